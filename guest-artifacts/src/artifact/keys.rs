use crate::artifact::store::ArtifactFormat;

/// The guest fields an artifact key is derived from. None of them change after
/// the guest is created, so neither do the keys.
#[derive(Debug, Clone, Copy)]
pub struct KeyParts<'a> {
    pub event_id: &'a str,
    pub display_name: &'a str,
    pub table_no: &'a str,
    pub others: &'a str,
    pub subject_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKeys {
    pub vector: String,
    pub raster: String,
}

impl ArtifactKeys {
    pub fn for_format(&self, format: ArtifactFormat) -> &str {
        match format {
            ArtifactFormat::Vector => &self.vector,
            ArtifactFormat::Raster => &self.raster,
        }
    }
}

/// Derives storage keys for guest artifacts.
///
/// Vector: `{vector_namespace}/{event}/{name}_{table}_{others}_{subject}.svg`
/// Raster: `{raster_namespace}/{event}/{name}_{table}_{others}_{subject}.png`
///
/// Both are built from the same parts; the raster key is never computed by
/// rewriting a stored vector key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    vector_namespace: String,
    raster_namespace: String,
}

impl KeyScheme {
    pub fn new(vector_namespace: impl Into<String>, raster_namespace: impl Into<String>) -> Self {
        Self {
            vector_namespace: trim_slashes(vector_namespace.into()),
            raster_namespace: trim_slashes(raster_namespace.into()),
        }
    }

    pub fn key_for(&self, parts: &KeyParts<'_>, format: ArtifactFormat) -> String {
        let namespace = match format {
            ArtifactFormat::Vector => &self.vector_namespace,
            ArtifactFormat::Raster => &self.raster_namespace,
        };
        format!(
            "{namespace}/{}/{}.{}",
            sanitize_segment(parts.event_id, "event"),
            file_stem(parts),
            format.extension()
        )
    }

    pub fn keys_for(&self, parts: &KeyParts<'_>) -> ArtifactKeys {
        ArtifactKeys {
            vector: self.key_for(parts, ArtifactFormat::Vector),
            raster: self.key_for(parts, ArtifactFormat::Raster),
        }
    }
}

fn trim_slashes(value: String) -> String {
    value.trim_matches('/').to_string()
}

/// `{name}_{table}_{others}_{subject}`, shared by storage keys and archive entries.
/// The subject id keeps it unique per guest.
pub fn file_stem(parts: &KeyParts<'_>) -> String {
    format!(
        "{}_{}_{}_{}",
        sanitize_name(parts.display_name),
        sanitize_segment(parts.table_no, "0"),
        sanitize_segment(parts.others, "0"),
        sanitize_segment(parts.subject_id, "unknown"),
    )
}

/// Collapses every run of characters outside `[A-Za-z0-9-]` into a single `_`
pub fn sanitize_name(name: &str) -> String {
    sanitize_segment(name, "guest")
}

fn sanitize_segment(value: &str, empty: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_separator = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }
    if out.is_empty() {
        empty.to_string()
    } else {
        out
    }
}

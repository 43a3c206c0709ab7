use serde::{Deserialize, Serialize};

/// One guest artifact requested for an archive.
///
/// `key` is the vector object and `fallback_key` the raster object; the two are
/// tried in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveItem {
    pub key: String,
    pub fallback_key: String,
    pub guest_id: String,
    pub display_name: String,
    #[serde(default)]
    pub table_no: String,
    #[serde(default)]
    pub others: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    pub items: Vec<ArchiveItem>,
    #[serde(default)]
    pub destination_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingFile {
    pub item: ArchiveItem,
    pub reason: String,
    pub attempted_keys: Vec<String>,
}

/// What went into an archive and what could not. `added_files` plus
/// `missing_files` always covers every requested item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    pub archive_location: Option<String>,
    pub archive_key: Option<String>,
    pub archive_bytes: Option<u64>,
    pub added_files: Vec<String>,
    pub missing_files: Vec<MissingFile>,
}

impl ArchiveManifest {
    pub fn requested(&self) -> usize {
        self.added_files.len() + self.missing_files.len()
    }
}

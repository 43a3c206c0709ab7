use bytes::Bytes;
use qrcode::{EcLevel, QrCode};

use crate::artifact::color::{ArtifactColors, Color};
use crate::error::PipelineError;

/// Modules of background around the code, as required by scanners
pub const QUIET_ZONE: usize = 4;
/// SVG user units per module
const MODULE_SIZE: usize = 10;

pub const SVG_MEDIA_TYPE: &str = "image/svg+xml";

/// Render the scannable artifact for `subject_id`.
///
/// The QR payload is exactly `subject_id`. Dark modules are painted with a
/// radial gradient running from `center` to `edge`; `background` fills the
/// whole canvas, quiet zone included. Output is a pure function of the inputs.
pub fn generate(
    subject_id: &str,
    background: Color,
    center: Color,
    edge: Color,
) -> Result<Bytes, PipelineError> {
    if subject_id.trim().is_empty() {
        return Err(PipelineError::InvalidArgument(
            "subject id must not be empty".to_string(),
        ));
    }

    let code = QrCode::with_error_correction_level(subject_id.as_bytes(), EcLevel::Q).map_err(
        |e| PipelineError::InvalidArgument(format!("cannot encode subject id: {e}")),
    )?;

    let width = code.width();
    let modules = code.to_colors();
    let dimension = (width + 2 * QUIET_ZONE) * MODULE_SIZE;

    let mut path = String::new();
    for (index, module) in modules.iter().enumerate() {
        if *module != qrcode::Color::Dark {
            continue;
        }
        let x = (index % width + QUIET_ZONE) * MODULE_SIZE;
        let y = (index / width + QUIET_ZONE) * MODULE_SIZE;
        path.push_str(&format!(
            "M{x} {y}h{MODULE_SIZE}v{MODULE_SIZE}h-{MODULE_SIZE}z"
        ));
    }

    let svg = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "\n",
            r#"<svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="{dim}" height="{dim}" viewBox="0 0 {dim} {dim}" shape-rendering="crispEdges">"#,
            r#"<defs><radialGradient id="modules" cx="50%" cy="50%" r="50%">"#,
            r#"<stop offset="0%" stop-color="{center}"/><stop offset="100%" stop-color="{edge}"/>"#,
            r#"</radialGradient></defs>"#,
            r#"<rect x="0" y="0" width="{dim}" height="{dim}" fill="{background}"/>"#,
            r#"<path d="{path}" fill="url(#modules)"/>"#,
            "</svg>\n"
        ),
        dim = dimension,
        center = center.to_hex(),
        edge = edge.to_hex(),
        background = background.to_hex(),
        path = path,
    );

    Ok(Bytes::from(svg))
}

/// Convenience wrapper over [`generate`] for a stored color set
pub fn generate_with(subject_id: &str, colors: &ArtifactColors) -> Result<Bytes, PipelineError> {
    generate(subject_id, colors.background, colors.center, colors.edge)
}

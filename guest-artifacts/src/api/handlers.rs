use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ApiError, Result};
use crate::archive::ArchiveRequest;
use crate::artifact::color::ArtifactColors;
use crate::artifact::store::ArtifactFormat;
use crate::artifact::ArtifactReference;
use crate::context::AppContext;
use crate::error::PipelineError;
use crate::guests::{DeliveryChannel, Guest};
use crate::import::{ImportNotification, SheetFormat};
use crate::notify::NotifyRequest;

pub const FALLBACK_HEADER: &str = "x-artifact-fallback";

fn parse_guest_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::BadRequest(format!("'{raw}' is not a guest id")))
}

/// Batch outcomes go back whole. A batch in which no item could be processed
/// is a 422, still carrying the per-item outcome.
fn batch_response<T: Serialize>(processed: usize, requested: usize, outcome: T) -> Response {
    if processed > 0 {
        return Json(outcome).into_response();
    }
    ApiError::from(PipelineError::CapacityExceeded(format!(
        "none of the {requested} requested items could be processed"
    )))
    .into_response_with(outcome)
}

async fn load_guest(ctx: &AppContext, event_id: &str, guest_id: &str) -> Result<Guest> {
    let guest_id = parse_guest_id(guest_id)?;
    Ok(ctx.guests.get_guest(event_id, guest_id).await?)
}

pub async fn archive_artifacts(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<String>,
    request: std::result::Result<Json<ArchiveRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = request?;
    let requested = request.items.len();
    let prefix = request
        .destination_prefix
        .clone()
        .unwrap_or_else(|| format!("{}/{event_id}", ctx.settings.archive_prefix));

    tracing::info!(event_id = %event_id, requested, "archiving artifacts");
    let manifest = ctx.archiver.archive(request.items, Some(prefix.as_str())).await?;

    Ok(batch_response(manifest.added_files.len(), requested, manifest))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportParams {
    pub notify: Option<DeliveryChannel>,
    pub template_id: Option<String>,
}

pub async fn import_guests(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<String>,
    params: std::result::Result<Query<ImportParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let Query(params) = params?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing content type".to_string()))?;
    let format = SheetFormat::from_content_type(content_type)?;

    let notification = match (params.notify, params.template_id) {
        (Some(channel), Some(template_id)) if !template_id.trim().is_empty() => {
            Some(ImportNotification {
                channel,
                template_id,
            })
        }
        (Some(_), _) => {
            return Err(ApiError::BadRequest(
                "templateId is required when notify is set".to_string(),
            ))
        }
        (None, _) => None,
    };

    let report = ctx
        .importer
        .import(&event_id, format, &body, notification, &ctx.shutdown)
        .await?;
    Ok(batch_response(report.processed(), report.total, report))
}

pub async fn notify_guests(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<String>,
    request: std::result::Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = request?;
    let report = ctx
        .notifier
        .notify(&event_id, request, &ctx.shutdown)
        .await?;
    Ok(batch_response(report.processed(), report.total, report))
}

#[derive(Debug, Deserialize)]
pub struct ArtifactParams {
    pub format: Option<String>,
}

pub async fn get_artifact(
    State(ctx): State<Arc<AppContext>>,
    Path((event_id, guest_id)): Path<(String, String)>,
    Query(params): Query<ArtifactParams>,
) -> Result<Response> {
    let format = match params.format.as_deref() {
        Some(format) => format.parse::<ArtifactFormat>()?,
        None => ArtifactFormat::Vector,
    };
    let guest = load_guest(&ctx, &event_id, &guest_id).await?;
    let resolved = ctx.artifacts.resolve(&guest, format).await?;

    let content_type = resolved.format_used().content_type();
    let fallback = if resolved.used_fallback { "true" } else { "false" };
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (
                header::HeaderName::from_static(FALLBACK_HEADER),
                HeaderValue::from_static(fallback),
            ),
        ],
        resolved.artifact.into_bytes(),
    )
        .into_response())
}

pub async fn update_colors(
    State(ctx): State<Arc<AppContext>>,
    Path((event_id, guest_id)): Path<(String, String)>,
    colors: std::result::Result<Json<ArtifactColors>, JsonRejection>,
) -> Result<Json<ArtifactReference>> {
    let Json(colors) = colors?;
    let mut guest = load_guest(&ctx, &event_id, &guest_id).await?;
    let reference = ctx.artifacts.recolor(&mut guest, colors).await?;
    Ok(Json(reference))
}

pub async fn delete_guest(
    State(ctx): State<Arc<AppContext>>,
    Path((event_id, guest_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let guest = load_guest(&ctx, &event_id, &guest_id).await?;
    ctx.guests.delete_guest(&event_id, guest.id).await?;
    ctx.artifacts.delete_artifacts(&guest).await;
    tracing::info!(event_id = %event_id, guest_id = %guest.id, "guest deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn index() -> &'static str {
    "guest artifacts"
}

pub async fn liveness() -> &'static str {
    "ok"
}

pub async fn readiness(
    State(ctx): State<Arc<AppContext>>,
) -> std::result::Result<&'static str, StatusCode> {
    if !ctx.is_running() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    ctx.guests
        .health_check()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok("ok")
}

pub mod error;
pub mod handlers;
pub mod metrics;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};

use crate::context::AppContext;
use handlers::{
    archive_artifacts, delete_guest, get_artifact, import_guests, index, liveness,
    notify_guests, readiness, update_colors,
};

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let import_limit = ctx.settings.max_import_bytes;

    let api_routes = Router::new()
        .route(
            "/api/events/:event_id/artifacts/archive",
            post(archive_artifacts),
        )
        .route(
            "/api/events/:event_id/guests/import",
            post(import_guests).layer(DefaultBodyLimit::max(import_limit)),
        )
        .route("/api/events/:event_id/guests/notify", post(notify_guests))
        .route(
            "/api/events/:event_id/guests/:guest_id/artifact",
            get(get_artifact),
        )
        .route(
            "/api/events/:event_id/guests/:guest_id/colors",
            put(update_colors),
        )
        .route(
            "/api/events/:event_id/guests/:guest_id",
            delete(delete_guest),
        );

    let health_routes = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .route("/_readiness", get(readiness));

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .with_state(ctx)
}

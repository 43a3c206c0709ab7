use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::error::PipelineError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(e) => match e {
                PipelineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
                PipelineError::CapacityExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::TransientIo(_) => StatusCode::BAD_GATEWAY,
                PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::ConversionFailed(_)
                | PipelineError::WorkerPanicked(_)
                | PipelineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn log(&self, status: StatusCode) {
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request error");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }
    }

    fn message(&self, status: StatusCode) -> String {
        // Internal details stay in the logs
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal error".to_string()
        } else {
            self.to_string()
        }
    }

    /// The usual `{error, code}` body with a batch outcome flattened in next to
    /// it, so a rejected batch still reports every item
    pub fn into_response_with<T: Serialize>(self, outcome: T) -> Response {
        let status = self.status();
        self.log(status);

        let body = Json(OutcomeBody {
            error: self.message(status),
            code: status.as_u16(),
            outcome,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct OutcomeBody<T> {
    error: String,
    code: u16,
    #[serde(flatten)]
    outcome: T,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        self.log(status);

        let body = Json(json!({
            "error": self.message(status),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

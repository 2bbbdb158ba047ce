use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error taxonomy of the service. Every variant maps to exactly one HTTP
/// status code; the orchestrator tasks additionally map variants to the
/// [`ApplicationStatus`](crate::application::ApplicationStatus) persisted
/// on the record.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    InvalidParameter(String),
    #[error("invalid registry credentials")]
    Unauthorized,
    #[error("No application found for team {0}")]
    NotFound(String),
    /// The container was created but never reached a sustained running
    /// state. Carries what was observed so the record can be persisted
    /// with the captured logs.
    #[error("{message}")]
    ContainerStart {
        message: String,
        container_id: String,
        container_status: String,
        logs: String,
    },
    #[error("docker API error: {0}")]
    Docker(#[source] bollard::errors::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidParameter(_) | Error::ContainerStart { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Docker(_) | Error::Redis(_) | Error::RedisPool(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// The JSON body returned for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
    pub status_code: u16,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error!(error = %self, "request had an error");

        let code = self.status_code();

        (
            code,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Json(ApiError {
                message: self.to_string(),
                status_code: code.as_u16(),
            }),
        )
            .into_response()
    }
}

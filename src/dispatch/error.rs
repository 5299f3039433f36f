use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Everything that can stop a dispatch, as a typed sentinel the handler
/// maps to an HTTP response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("IP blocked")]
    Blocked { reason: String },

    #[error("link not found")]
    NotFound,

    /// One of the windowed counters tripped. Carries the user-visible
    /// message, which differs per tier.
    #[error("{0}")]
    RateLimited(&'static str),

    /// The link's global cap is exhausted.
    #[error("link cap reached")]
    Capped,

    /// Every target was filtered out.
    #[error("no available targets")]
    NoTargets,

    /// Persistent store or counter store failure with no safe degradation.
    #[error("internal server error")]
    Upstream(#[source] anyhow::Error),

    /// The configured target URL does not parse.
    #[error("invalid target URL")]
    BadUrl,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// 302 to the given destination.
pub fn redirect_to(destination: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, destination.to_string())]).into_response()
}

impl DispatchError {
    /// Turn the error into a response, preferring the link's backup URL
    /// where the taxonomy allows it. Blocked, not-found and hard upstream
    /// failures never fall back.
    pub fn into_response_with_backup(self, backup_url: Option<&str>) -> Response {
        let backup = backup_url.filter(|u| !u.is_empty());
        match &self {
            DispatchError::RateLimited(_) | DispatchError::Capped | DispatchError::NoTargets => {
                if let Some(backup) = backup {
                    return redirect_to(backup);
                }
            }
            _ => {}
        }
        self.into_response()
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            DispatchError::Blocked { reason } => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    error: "IP blocked".to_string(),
                    reason: Some(reason),
                },
            ),
            DispatchError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "link not found".to_string(),
                    reason: None,
                },
            ),
            DispatchError::RateLimited(message) => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    error: message.to_string(),
                    reason: None,
                },
            ),
            DispatchError::Capped => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    error: "link cap reached".to_string(),
                    reason: None,
                },
            ),
            DispatchError::NoTargets => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    error: "no available targets".to_string(),
                    reason: None,
                },
            ),
            DispatchError::Upstream(e) => {
                error!("dispatch failed on upstream store: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal server error".to_string(),
                        reason: None,
                    },
                )
            }
            DispatchError::BadUrl => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "invalid target URL".to_string(),
                    reason: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by HTTP handlers. Every variant renders as
/// `{ "success": false, "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Please verify your email before signing in")]
    NeedsVerification { email: String },

    #[error("server configuration error: {0}")]
    Config(String),

    #[error("{message}")]
    Upstream {
        message: String,
        detail: Option<String>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::NeedsVerification { .. } => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Config(_) | Self::Upstream { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::NeedsVerification { email } => json!({
                "success": false,
                "error": self.to_string(),
                "needsVerification": true,
                "email": email,
            }),
            Self::Config(what) => {
                error!(missing = %what, "server configuration error");
                json!({ "success": false, "error": "Server configuration error" })
            }
            Self::Upstream { message, detail } => match detail {
                Some(detail) => json!({ "success": false, "error": message, "details": detail }),
                None => json!({ "success": false, "error": message }),
            },
            Self::Internal(e) => {
                error!(error = ?e, "internal error");
                json!({ "success": false, "error": "Internal server error" })
            }
            _ => json!({ "success": false, "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

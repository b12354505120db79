use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use nodewarden_node::error::NodeError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("service unavailable")]
    Unavailable,

    #[error("internal server error")]
    Internal,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        if err.is_unavailable() {
            tracing::warn!(error = %err, "node unavailable");
            return Self::Unavailable;
        }
        match &err {
            NodeError::ProtocolDisabled(_) | NodeError::InvalidBackup(_) => {
                Self::BadRequest(err.to_string())
            }
            NodeError::PeerLimitReached { .. }
            | NodeError::DuplicateClientId(_)
            | NodeError::Alloc(_) => Self::Conflict(err.to_string()),
            _ => {
                tracing::error!(error = %err, "node error");
                Self::Internal
            }
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TetherError {
    #[error("Unauthorized: {0}")]
    #[diagnostic(code(tether::unauthorized))]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    #[diagnostic(code(tether::forbidden))]
    Forbidden(String),

    /// Also returned for entities owned by another organization.
    #[error("Not found: {0}")]
    #[diagnostic(code(tether::not_found))]
    NotFound(String),

    #[error("Expired: {0}")]
    #[diagnostic(code(tether::expired))]
    Expired(String),

    #[error("Conflict: {0}")]
    #[diagnostic(code(tether::conflict))]
    Conflict(String),

    #[error("Limit exceeded: {0}")]
    #[diagnostic(
        code(tether::limit_exceeded),
        help("Raise the organization's plan limits or retire unused devices")
    )]
    LimitExceeded(String),

    #[error("Transport failure: {0}")]
    #[diagnostic(code(tether::transport))]
    TransportFailure(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(tether::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(tether::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(tether::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(tether::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Bad request: {0}")]
    #[diagnostic(code(tether::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(tether::other))]
    Other(String),
}

impl TetherError {
    /// Stable machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            TetherError::Unauthorized(_) => "unauthorized",
            TetherError::Forbidden(_) => "forbidden",
            TetherError::NotFound(_) => "not_found",
            TetherError::Expired(_) => "expired",
            TetherError::Conflict(_) => "conflict",
            TetherError::LimitExceeded(_) => "limit_exceeded",
            TetherError::TransportFailure(_) => "transport_failure",
            TetherError::BadRequest(_) => "bad_request",
            TetherError::Io(_)
            | TetherError::Config(_)
            | TetherError::Serde(_)
            | TetherError::Db(_)
            | TetherError::Other(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            TetherError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TetherError::Forbidden(_) => StatusCode::FORBIDDEN,
            TetherError::NotFound(_) => StatusCode::NOT_FOUND,
            TetherError::Expired(_) => StatusCode::GONE,
            TetherError::Conflict(_) => StatusCode::CONFLICT,
            TetherError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TetherError::TransportFailure(_) => StatusCode::BAD_GATEWAY,
            TetherError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TetherError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        // Internal details stay in the log
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "internal server error".to_string(),
            _ => self.to_string(),
        };
        let body = json!({ "error": self.kind(), "message": message });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(
            TetherError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            TetherError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            TetherError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(TetherError::Expired("x".into()).status_code(), StatusCode::GONE);
        assert_eq!(
            TetherError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            TetherError::Other("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_share_a_kind() {
        let err = TetherError::Db(sea_orm::DbErr::Custom("boom".into()));
        assert_eq!(err.kind(), "server_error");
        assert_eq!(TetherError::Expired("code".into()).kind(), "expired");
    }
}

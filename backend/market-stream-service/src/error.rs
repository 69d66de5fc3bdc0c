use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::bus::BusError;
use crate::cache::CacheError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("kafka error: {0}")]
    Kafka(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::StartServer(_) => "start_failure",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound => "not_found",
            AppError::Cache(_) => "cache_unavailable",
            AppError::Kafka(_) => "kafka_unavailable",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }))
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        AppError::Cache(e.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(_: AuthError) -> Self {
        AppError::Unauthorized
    }
}

/// Credential decode failures. Terminal for the attempt that presented them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Outcome classes for a single ingested record.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The record cannot be normalized. Logged and skipped.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// The cache or bus connection failed. Fatal to the consumer.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl IngestError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Transport(_))
    }
}

impl From<CacheError> for IngestError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Serialization(err) => IngestError::Malformed(err.to_string()),
            other => IngestError::Transport(other.to_string()),
        }
    }
}

impl From<BusError> for IngestError {
    fn from(e: BusError) -> Self {
        IngestError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Cache("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Config("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_auth_error_maps_to_unauthorized() {
        let err: AppError = AuthError::Expired.into();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn test_ingest_error_fatality() {
        assert!(!IngestError::Malformed("not json".into()).is_fatal());
        assert!(IngestError::Transport("connection refused".into()).is_fatal());
    }
}

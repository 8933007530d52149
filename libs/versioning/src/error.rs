//! Error taxonomy for version tracking, history and patch application

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use verso_patch::PatchError;

use crate::models::ResourceKey;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Resource not found: {key}")]
    NotFound { key: ResourceKey },

    #[error("Version not found: {key}/_history/{version}")]
    VersionNotFound { key: ResourceKey, version: i32 },

    #[error("Resource already exists: {key}")]
    AlreadyExists { key: ResourceKey },

    #[error("Resource deleted: {key}")]
    AlreadyDeleted { key: ResourceKey, version: i32 },

    #[error("Version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: i32, actual: i32 },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("Outcome unknown: {0}")]
    OutcomeUnknown(String),
}

impl Error {
    pub fn not_found(key: &ResourceKey) -> Self {
        Error::NotFound { key: key.clone() }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } | Error::VersionNotFound { .. } => StatusCode::NOT_FOUND,
            Error::AlreadyExists { .. } => StatusCode::CONFLICT,
            Error::AlreadyDeleted { .. } => StatusCode::GONE,
            Error::VersionConflict { .. } => StatusCode::PRECONDITION_FAILED,
            Error::Patch(e) if e.is_malformed() => StatusCode::BAD_REQUEST,
            Error::Patch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::InvalidResource(_) | Error::InvalidPageToken(_) => StatusCode::BAD_REQUEST,
            Error::OutcomeUnknown(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(_) | Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        let error_message = match &self {
            Error::Database(_) | Error::Storage(_) => {
                tracing::error!("Internal error: {}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let etag = match &self {
            Error::AlreadyDeleted { version, .. } => Some(*version),
            _ => None,
        };

        let body = Json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": status_to_issue_code(status),
                "diagnostics": error_message
            }]
        }));

        let mut response = (status, body).into_response();

        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json; charset=utf-8"),
        );

        if let Some(version) = etag {
            if let Ok(value) = HeaderValue::from_str(&crate::api::headers::format_etag(version)) {
                response.headers_mut().insert(header::ETAG, value);
            }
        }

        response
    }
}

fn status_to_issue_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "invalid",
        StatusCode::NOT_FOUND => "not-found",
        StatusCode::GONE => "deleted",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "not-supported",
        StatusCode::CONFLICT => "duplicate",
        StatusCode::PRECONDITION_FAILED => "conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "processing",
        StatusCode::SERVICE_UNAVAILABLE => "timeout",
        _ => "exception",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ResourceKey {
        ResourceKey::new("Patient", "p1")
    }

    #[test]
    fn status_table() {
        assert_eq!(Error::not_found(&key()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::VersionNotFound { key: key(), version: 9 }.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::AlreadyExists { key: key() }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::AlreadyDeleted { key: key(), version: 3 }.status(),
            StatusCode::GONE
        );
        assert_eq!(
            Error::VersionConflict { expected: 1, actual: 2 }.status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            Error::Patch(PatchError::Malformed("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Patch(PatchError::InvalidPointer { index: 0, pointer: "a".into() }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Patch(PatchError::TestFailed { index: 0, path: "/a".into() }).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::Patch(PatchError::PathNotFound { index: 0, path: "/a".into() }).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::UnsupportedMediaType("text/plain".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            Error::OutcomeUnknown("timeout".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Storage("poisoned".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn gone_response_carries_etag() {
        let response = Error::AlreadyDeleted { key: key(), version: 4 }.into_response();
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(response.headers().get(header::ETAG).unwrap(), "W/\"4\"");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/fhir+json; charset=utf-8"
        );
    }

    #[test]
    fn conflict_response_has_no_etag() {
        let response = Error::VersionConflict { expected: 1, actual: 2 }.into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert!(response.headers().get(header::ETAG).is_none());
    }
}

//! Version headers
//!
//! Parsing and formatting of the headers that carry resource versions over
//! HTTP.
//!
//! ## Request Headers
//! - `If-Match` - expected version for conditional writes
//!
//! ## Response Headers
//! - `ETag` - version as weak ETag (`W/"versionId"`)
//! - `Last-Modified` - from the snapshot's `recorded_at`
//! - `Location` - versioned location after a write

use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use chrono::{DateTime, Utc};

use crate::models::ResourceView;

// ============================================================================
// ETag Handling
// ============================================================================

/// Parse an ETag header value to a version.
///
/// Accepts the weak form `W/"3141"` as well as a bare quoted `"3141"`.
///
/// # Examples
/// ```
/// use verso_versioning::api::headers::parse_etag;
/// assert_eq!(parse_etag("W/\"3141\""), Some(3141));
/// assert_eq!(parse_etag("\"23\""), Some(23));
/// assert_eq!(parse_etag("invalid"), None);
/// ```
pub fn parse_etag(etag: &str) -> Option<i32> {
    etag.trim()
        .trim_start_matches("W/")
        .trim_start_matches('"')
        .trim_end_matches('"')
        .parse()
        .ok()
}

/// Format a version as a weak ETag.
///
/// # Examples
/// ```
/// use verso_versioning::api::headers::format_etag;
/// assert_eq!(format_etag(3141), "W/\"3141\"");
/// ```
pub fn format_etag(version: i32) -> String {
    format!("W/\"{}\"", version)
}

// ============================================================================
// Last-Modified Handling
// ============================================================================

/// Format an instant as an RFC 7232 `Last-Modified` value (GMT).
pub fn format_last_modified(recorded_at: &DateTime<Utc>) -> String {
    recorded_at.to_rfc2822().replace("+0000", "GMT")
}

// ============================================================================
// Conditional Request Headers
// ============================================================================

/// Extract the `If-Match` header as an expected version.
///
/// A header that does not parse as a version is treated as absent.
pub fn extract_if_match(headers: &HeaderMap) -> Option<i32> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_etag)
}

// ============================================================================
// Response Header Building
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VersionHeaders {
    pub location: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl VersionHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, location: String) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_etag(mut self, version: i32) -> Self {
        self.etag = Some(format_etag(version));
        self
    }

    pub fn with_last_modified(mut self, recorded_at: &DateTime<Utc>) -> Self {
        self.last_modified = Some(format_last_modified(recorded_at));
        self
    }

    /// ETag and Last-Modified for a read.
    pub fn for_read(view: &ResourceView) -> Self {
        Self::new()
            .with_etag(view.version)
            .with_last_modified(&view.recorded_at)
    }

    /// Location, ETag and Last-Modified for a create or update.
    pub fn for_write(view: &ResourceView) -> Self {
        Self::for_read(view).with_location(format!(
            "{}/{}/_history/{}",
            view.key.kind, view.key.id, view.version
        ))
    }

    pub fn apply_to_response(&self, mut response: Response) -> Response {
        let headers = response.headers_mut();

        for (name, value) in [
            (header::LOCATION, &self.location),
            (header::ETAG, &self.etag),
            (header::LAST_MODIFIED, &self.last_modified),
        ] {
            if let Some(value) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKey;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn view() -> ResourceView {
        ResourceView {
            key: ResourceKey::new("Patient", "123"),
            version: 5,
            recorded_at: DateTime::parse_from_rfc3339("2023-01-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            body: serde_json::json!({}),
        }
    }

    #[test]
    fn test_parse_etag() {
        assert_eq!(parse_etag("W/\"3141\""), Some(3141));
        assert_eq!(parse_etag("W/\"1\""), Some(1));
        assert_eq!(parse_etag(" \"7\" "), Some(7));
        assert_eq!(parse_etag("invalid"), None);
        assert_eq!(parse_etag(""), None);
    }

    #[test]
    fn test_format_etag() {
        assert_eq!(format_etag(23), "W/\"23\"");
    }

    #[test]
    fn test_format_last_modified() {
        let dt = view().recorded_at;
        assert_eq!(format_last_modified(&dt), "Sun, 1 Jan 2023 12:00:00 GMT");
    }

    #[test]
    fn test_extract_if_match() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_if_match(&headers), None);

        headers.insert("if-match", "W/\"2\"".parse().unwrap());
        assert_eq!(extract_if_match(&headers), Some(2));

        headers.insert("if-match", "*".parse().unwrap());
        assert_eq!(extract_if_match(&headers), None);
    }

    #[test]
    fn test_write_headers_applied() {
        let response = VersionHeaders::for_write(&view())
            .apply_to_response(StatusCode::OK.into_response());

        let headers = response.headers();
        assert_eq!(headers.get(header::ETAG).unwrap(), "W/\"5\"");
        assert_eq!(
            headers.get(header::LOCATION).unwrap(),
            "Patient/123/_history/5"
        );
        assert!(headers.get(header::LAST_MODIFIED).is_some());
    }

    #[test]
    fn test_read_headers_have_no_location() {
        let headers = VersionHeaders::for_read(&view());
        assert!(headers.location.is_none());
        assert_eq!(headers.etag.as_deref(), Some("W/\"5\""));
    }
}

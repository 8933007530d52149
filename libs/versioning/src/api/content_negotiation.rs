//! Patch content negotiation
//!
//! Selects the patch interpreter from the request `Content-Type`:
//! - `application/json-patch+json` -> RFC 6902 JSON Patch
//! - `application/merge-patch+json` -> RFC 7396 JSON Merge Patch
//!
//! Parameters such as `charset` are ignored and the match is case-insensitive.
//! Anything else is rejected before the body is parsed.

use axum::http::{header, HeaderMap};
use verso_patch::{PatchDocument, PatchFormat, JSON_PATCH_MEDIA_TYPE, MERGE_PATCH_MEDIA_TYPE};

use crate::{Error, Result};

/// Resolve the patch format from a `Content-Type` value.
pub fn patch_format_from_content_type(content_type: Option<&str>) -> Result<PatchFormat> {
    let content_type = content_type
        .map(|s| s.split(';').next().unwrap_or("").trim())
        .unwrap_or_default();

    if content_type.is_empty() {
        return Err(Error::UnsupportedMediaType(
            "Missing Content-Type for PATCH request".to_string(),
        ));
    }

    PatchFormat::from_media_type(content_type).ok_or_else(|| {
        Error::UnsupportedMediaType(format!(
            "Unsupported PATCH Content-Type '{}'. Supported: {}, {}",
            content_type, JSON_PATCH_MEDIA_TYPE, MERGE_PATCH_MEDIA_TYPE
        ))
    })
}

/// Resolve the patch format from request headers.
pub fn negotiate_patch_format(headers: &HeaderMap) -> Result<PatchFormat> {
    patch_format_from_content_type(
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    )
}

/// Negotiate the format and parse the body into a patch document.
pub fn parse_patch_request(headers: &HeaderMap, body: &[u8]) -> Result<PatchDocument> {
    let format = negotiate_patch_format(headers)?;
    Ok(PatchDocument::parse(format, body)?)
}

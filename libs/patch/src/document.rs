use serde_json::Value;
use std::fmt;

use crate::error::{PatchError, Result};
use crate::patch::Patch;
use crate::merge::merged;

pub const JSON_PATCH_MEDIA_TYPE: &str = "application/json-patch+json";
pub const MERGE_PATCH_MEDIA_TYPE: &str = "application/merge-patch+json";

/// The two partial-update formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchFormat {
    JsonPatch,
    MergePatch,
}

impl PatchFormat {
    /// Match a `Content-Type` value. Parameters are ignored and the
    /// comparison is case-insensitive.
    pub fn from_media_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            JSON_PATCH_MEDIA_TYPE => Some(PatchFormat::JsonPatch),
            MERGE_PATCH_MEDIA_TYPE => Some(PatchFormat::MergePatch),
            _ => None,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            PatchFormat::JsonPatch => JSON_PATCH_MEDIA_TYPE,
            PatchFormat::MergePatch => MERGE_PATCH_MEDIA_TYPE,
        }
    }
}

impl fmt::Display for PatchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

/// A parsed partial-update payload of either format.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchDocument {
    Json(Patch),
    Merge(Value),
}

impl PatchDocument {
    pub fn parse(format: PatchFormat, bytes: &[u8]) -> Result<Self> {
        match format {
            PatchFormat::JsonPatch => Patch::from_slice(bytes).map(PatchDocument::Json),
            PatchFormat::MergePatch => serde_json::from_slice(bytes)
                .map(PatchDocument::Merge)
                .map_err(|e| PatchError::Malformed(format!("invalid JSON: {e}"))),
        }
    }

    pub fn format(&self) -> PatchFormat {
        match self {
            PatchDocument::Json(_) => PatchFormat::JsonPatch,
            PatchDocument::Merge(_) => PatchFormat::MergePatch,
        }
    }

    /// Produce the patched body. Merge patches cannot fail.
    pub fn apply(&self, doc: &Value) -> Result<Value> {
        match self {
            PatchDocument::Json(patch) => patch.apply(doc),
            PatchDocument::Merge(patch) => Ok(merged(doc, patch)),
        }
    }
}

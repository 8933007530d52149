//! Partial-update interpreters for JSON documents.
//!
//! - [`Patch`]: RFC 6902 JSON Patch on top of `json_patch`, applied
//!   atomically with errors that name the failing operation.
//! - [`merge_patch`]: RFC 7396 JSON Merge Patch, plus type-change warnings.
//! - [`JsonPointer`]: RFC 6901 pointers used to validate operations and to
//!   locate warnings.
//!
//! Everything here is synchronous and side-effect free. Callers get a new
//! document or an error; the input is never modified on failure.

pub mod document;
pub mod error;
pub mod patch;
pub mod merge;
pub mod pointer;

pub use document::{PatchDocument, PatchFormat, JSON_PATCH_MEDIA_TYPE, MERGE_PATCH_MEDIA_TYPE};
pub use error::{PatchError, PointerError, Result};
pub use patch::{apply_patch, json_equal, Patch, PatchOperation};
pub use merge::{merge_patch, merge_patch_with_warnings, merged, JsonKind, MergeOutcome, MergeWarning};
pub use pointer::JsonPointer;

//! RFC 7396 JSON Merge Patch
//!
//! Merge patching is total: every pair of JSON values produces a result.
//! `null` members delete, objects merge key by key, everything else replaces.
//! The merge itself is `json_patch::merge`; this module adds a read-only pass
//! that reports members whose JSON type changes.

use serde_json::Value;
use std::fmt;

use crate::pointer::JsonPointer;

/// Apply `patch` to `target` in place.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    json_patch::merge(target, patch);
}

/// Apply `patch` to a copy of `target`.
pub fn merged(target: &Value, patch: &Value) -> Value {
    let mut out = target.clone();
    merge_patch(&mut out, patch);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonKind::Null,
            Value::Bool(_) => JsonKind::Bool,
            Value::Number(_) => JsonKind::Number,
            Value::String(_) => JsonKind::String,
            Value::Array(_) => JsonKind::Array,
            Value::Object(_) => JsonKind::Object,
        }
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonKind::Null => "null",
            JsonKind::Bool => "boolean",
            JsonKind::Number => "number",
            JsonKind::String => "string",
            JsonKind::Array => "array",
            JsonKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// A member whose JSON type changed during the merge. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeWarning {
    pub path: JsonPointer,
    pub from: JsonKind,
    pub to: JsonKind,
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.to_string();
        let path = if path.is_empty() { "/" } else { path.as_str() };
        write!(f, "{path}: {} replaced by {}", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub value: Value,
    pub warnings: Vec<MergeWarning>,
}

/// Like [`merged`], also reporting every place where an existing non-null
/// value was replaced by a value of a different JSON type.
pub fn merge_patch_with_warnings(target: &Value, patch: &Value) -> MergeOutcome {
    let mut warnings = Vec::new();
    collect_warnings(Some(target), patch, &mut JsonPointer::root(), &mut warnings);
    MergeOutcome {
        value: merged(target, patch),
        warnings,
    }
}

// Mirrors the merge recursion without modifying anything. A member the
// target lacks, or that sits under a non-object the merge resets to `{}`,
// reads as null and never warns.
fn collect_warnings(
    target: Option<&Value>,
    patch: &Value,
    path: &mut JsonPointer,
    warnings: &mut Vec<MergeWarning>,
) {
    let from = target.map_or(JsonKind::Null, JsonKind::of);
    let to = JsonKind::of(patch);
    if from != JsonKind::Null && from != to {
        warnings.push(MergeWarning {
            path: path.clone(),
            from,
            to,
        });
    }

    let Value::Object(patch_members) = patch else {
        return;
    };
    let members = target.and_then(Value::as_object);

    for (key, value) in patch_members {
        if value.is_null() {
            continue;
        }
        path.push(key.clone());
        collect_warnings(members.and_then(|m| m.get(key)), value, path, warnings);
        path.pop();
    }
}

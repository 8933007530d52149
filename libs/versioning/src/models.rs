//! Snapshot and view types shared by stores, tracker and history assembler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::api::headers::{format_etag, format_last_modified};

/// Identity of one logical resource across its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// What produced a snapshot. `Delete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotAction {
    Create,
    Update,
    Delete,
}

impl SnapshotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotAction::Create => "create",
            SnapshotAction::Update => "update",
            SnapshotAction::Delete => "delete",
        }
    }

    /// HTTP method that history entries report for this action.
    pub fn request_method(&self) -> &'static str {
        match self {
            SnapshotAction::Create => "POST",
            SnapshotAction::Update => "PUT",
            SnapshotAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SnapshotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SnapshotAction::Create),
            "update" => Ok(SnapshotAction::Update),
            "delete" => Ok(SnapshotAction::Delete),
            other => Err(format!("unknown snapshot action '{}'", other)),
        }
    }
}

/// One immutable history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: ResourceKey,
    pub version: i32,
    pub action: SnapshotAction,
    pub body: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn is_delete(&self) -> bool {
        self.action == SnapshotAction::Delete
    }
}

/// Head state a compare-and-set expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No snapshot exists yet for the key.
    Absent,
    /// The latest snapshot has this version and is not a delete.
    AtVersion(i32),
}

impl ExpectedVersion {
    /// Version the next snapshot will carry if the expectation holds, or
    /// `None` once the version space is exhausted.
    pub fn next_version(&self) -> Option<i32> {
        match self {
            ExpectedVersion::Absent => Some(1),
            ExpectedVersion::AtVersion(v) => v.checked_add(1),
        }
    }
}

/// A live resource as read from its latest snapshot.
///
/// `body` carries `id` and `meta.versionId` / `meta.lastUpdated` stamped from
/// the snapshot, whatever the stored body said.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceView {
    pub key: ResourceKey,
    pub version: i32,
    pub recorded_at: DateTime<Utc>,
    pub body: JsonValue,
}

impl ResourceView {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            key: snapshot.key.clone(),
            version: snapshot.version,
            recorded_at: snapshot.recorded_at,
            body: project_body(snapshot),
        }
    }

    /// Weak version token, `W/"<version>"`.
    pub fn etag(&self) -> String {
        format_etag(self.version)
    }

    pub fn last_modified(&self) -> String {
        format_last_modified(&self.recorded_at)
    }
}

/// Copy of the snapshot body with server-controlled identity and meta.
/// Non-object bodies are returned unchanged.
pub fn project_body(snapshot: &Snapshot) -> JsonValue {
    let mut body = snapshot.body.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".to_string(), JsonValue::String(snapshot.key.id.clone()));

        let meta = obj
            .entry("meta".to_string())
            .or_insert_with(|| serde_json::json!({}));
        if !meta.is_object() {
            *meta = serde_json::json!({});
        }
        if let Some(meta_obj) = meta.as_object_mut() {
            meta_obj.insert(
                "versionId".to_string(),
                JsonValue::String(snapshot.version.to_string()),
            );
            meta_obj.insert(
                "lastUpdated".to_string(),
                JsonValue::String(snapshot.recorded_at.to_rfc3339()),
            );
        }
    }
    body
}

/// Drop `meta.versionId` and `meta.lastUpdated` from a proposed body.
/// Both are stamped by `project_body`; a `meta` left empty is removed.
pub fn strip_server_meta(obj: &mut serde_json::Map<String, JsonValue>) {
    let emptied = match obj.get_mut("meta").and_then(JsonValue::as_object_mut) {
        Some(meta) => {
            meta.remove("versionId");
            meta.remove("lastUpdated");
            meta.is_empty()
        }
        None => false,
    };
    if emptied {
        obj.remove("meta");
    }
}

/// Filter for one history read, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only versions strictly below this one (page cursor).
    pub before_version: Option<i32>,
    /// Only snapshots recorded at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistorySlice {
    pub entries: Vec<Snapshot>,
    /// Snapshots matching `since` below the cursor, ignoring `count`.
    pub total: i64,
}

/// Current time truncated to microseconds, the precision PostgreSQL keeps.
pub fn now_micros() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

pub fn truncate_micros(instant: DateTime<Utc>) -> DateTime<Utc> {
    let us = (instant.timestamp_subsec_nanos() / 1_000) * 1_000;
    DateTime::from_timestamp(instant.timestamp(), us).unwrap_or(instant)
}

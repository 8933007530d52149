//! History and bundle assembly
//!
//! Reads snapshots and renders them as views, paged history and FHIR-style
//! `Bundle` documents. History pages are addressed by an opaque token that
//! encodes a version cursor. Snapshots are append-only, so a page read
//! through a token stays the same however many versions are added later.

use axum::http::StatusCode;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};

use crate::{
    api::headers::format_etag,
    db::SnapshotStore,
    models::{project_body, HistoryQuery, ResourceKey, ResourceView, Snapshot, SnapshotAction},
    Error, Result,
};

pub const DEFAULT_HISTORY_COUNT: i64 = 100;
pub const MAX_HISTORY_COUNT: i64 = 1000;

// ============================================================================
// Page Tokens
// ============================================================================

/// Decode a page token to the version cursor it carries.
pub fn decode_page_token(token: &str) -> Result<i32> {
    let invalid = || Error::InvalidPageToken(token.to_string());
    let decoded = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let raw = String::from_utf8(decoded).map_err(|_| invalid())?;
    let version: i32 = raw
        .strip_prefix("v,")
        .and_then(|v| v.parse().ok())
        .ok_or_else(invalid)?;
    if version < 1 {
        return Err(invalid());
    }
    Ok(version)
}

/// Encode a cursor: the next page holds versions strictly below `before_version`.
pub fn encode_page_token(before_version: i32) -> String {
    URL_SAFE_NO_PAD.encode(format!("v,{}", before_version).as_bytes())
}

// ============================================================================
// History Pages
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryRequest {
    pub count: Option<i64>,
    pub page_token: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub key: ResourceKey,
    /// Newest first.
    pub entries: Vec<Snapshot>,
    /// Entries matching `since` from this page onwards.
    pub total: i64,
    pub count: i64,
    pub since: Option<DateTime<Utc>>,
    pub next_page_token: Option<String>,
}

impl HistoryPage {
    /// Render as a `Bundle` of type `history`.
    pub fn to_bundle(&self, base_url: &str) -> JsonValue {
        let base_url = base_url.trim_end_matches('/');
        let history_url = format!("{}/{}/{}/_history", base_url, self.key.kind, self.key.id);

        let mut links = vec![json!({
            "relation": "self",
            "url": history_url,
        })];
        if let Some(token) = &self.next_page_token {
            let mut url = format!("{}?_count={}&_page_token={}", history_url, self.count, token);
            if let Some(since) = self.since {
                url.push_str("&_since=");
                url.push_str(&since.to_rfc3339_opts(SecondsFormat::Micros, true));
            }
            links.push(json!({
                "relation": "next",
                "url": url,
            }));
        }

        let entries: Vec<JsonValue> = self
            .entries
            .iter()
            .map(|snapshot| history_entry(base_url, snapshot))
            .collect();

        json!({
            "resourceType": "Bundle",
            "type": "history",
            "total": self.total,
            "link": links,
            "entry": entries,
        })
    }
}

fn history_entry(base_url: &str, snapshot: &Snapshot) -> JsonValue {
    let key = &snapshot.key;
    let status = match snapshot.action {
        SnapshotAction::Create => StatusCode::CREATED,
        SnapshotAction::Update => StatusCode::OK,
        SnapshotAction::Delete => StatusCode::NO_CONTENT,
    };

    json!({
        "fullUrl": format!("{}/{}/{}/_history/{}", base_url, key.kind, key.id, snapshot.version),
        "request": {
            "method": snapshot.action.request_method(),
            "url": key.to_string(),
        },
        "response": {
            "status": status_line(status),
            "etag": format_etag(snapshot.version),
            "lastModified": snapshot.recorded_at.to_rfc3339(),
        },
        // A delete carries the last live body under its own version.
        "resource": project_body(snapshot),
    })
}

/// Render live views as a `Bundle` of type `searchset`.
pub fn searchset_bundle(base_url: &str, views: &[ResourceView]) -> JsonValue {
    let base_url = base_url.trim_end_matches('/');
    let entries: Vec<JsonValue> = views
        .iter()
        .map(|view| {
            json!({
                "fullUrl": format!("{}/{}", base_url, view.key),
                "resource": view.body,
                "search": { "mode": "match" },
            })
        })
        .collect();

    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": views.len(),
        "entry": entries,
    })
}

fn status_line(code: StatusCode) -> String {
    match code.canonical_reason() {
        Some(r) => format!("{} {}", code.as_u16(), r),
        None => code.as_u16().to_string(),
    }
}

// ============================================================================
// Assembler
// ============================================================================

#[derive(Clone)]
pub struct HistoryAssembler<S: SnapshotStore> {
    store: S,
    default_count: i64,
    max_count: i64,
}

impl<S: SnapshotStore> HistoryAssembler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            default_count: DEFAULT_HISTORY_COUNT,
            max_count: MAX_HISTORY_COUNT,
        }
    }

    pub fn with_limits(mut self, default_count: i64, max_count: i64) -> Self {
        self.max_count = max_count.max(1);
        self.default_count = default_count.clamp(1, self.max_count);
        self
    }

    /// One page of history, newest first.
    pub async fn history(&self, kind: &str, id: &str, request: &HistoryRequest) -> Result<HistoryPage> {
        let key = ResourceKey::new(kind, id);
        let count = request
            .count
            .unwrap_or(self.default_count)
            .clamp(0, self.max_count);
        let before_version = request
            .page_token
            .as_deref()
            .map(decode_page_token)
            .transpose()?;

        let slice = self
            .store
            .snapshot_history(
                &key,
                &HistoryQuery {
                    before_version,
                    since: request.since,
                    count,
                },
            )
            .await?;

        if slice.entries.is_empty() && self.store.snapshot_latest(&key).await?.is_none() {
            return Err(Error::not_found(&key));
        }

        let next_page_token = match slice.entries.last() {
            Some(last) if slice.total > slice.entries.len() as i64 => {
                Some(encode_page_token(last.version))
            }
            _ => None,
        };

        tracing::debug!(
            "History of {}: {} of {} entries",
            key,
            slice.entries.len(),
            slice.total
        );

        Ok(HistoryPage {
            key,
            entries: slice.entries,
            total: slice.total,
            count,
            since: request.since,
            next_page_token,
        })
    }

    /// The latest live version.
    pub async fn current_view(&self, kind: &str, id: &str) -> Result<ResourceView> {
        let key = ResourceKey::new(kind, id);
        match self.store.snapshot_latest(&key).await? {
            None => Err(Error::not_found(&key)),
            Some(s) if s.is_delete() => Err(Error::AlreadyDeleted {
                key,
                version: s.version,
            }),
            Some(s) => Ok(ResourceView::from_snapshot(&s)),
        }
    }

    /// Any historical version. A delete snapshot reads as `AlreadyDeleted`.
    pub async fn version_view(&self, kind: &str, id: &str, version: i32) -> Result<ResourceView> {
        let key = ResourceKey::new(kind, id);
        match self.store.snapshot_version(&key, version).await? {
            Some(s) if s.is_delete() => Err(Error::AlreadyDeleted {
                key,
                version: s.version,
            }),
            Some(s) => Ok(ResourceView::from_snapshot(&s)),
            None => {
                if self.store.snapshot_latest(&key).await?.is_none() {
                    Err(Error::not_found(&key))
                } else {
                    Err(Error::VersionNotFound { key, version })
                }
            }
        }
    }

    /// Live views for `ids`, in order. Unknown and deleted ids are skipped.
    pub async fn current_views(&self, kind: &str, ids: &[&str]) -> Result<Vec<ResourceView>> {
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            match self.current_view(kind, id).await {
                Ok(view) => views.push(view),
                Err(Error::NotFound { .. } | Error::AlreadyDeleted { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(views)
    }
}

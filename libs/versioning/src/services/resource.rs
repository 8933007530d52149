//! Resource service
//!
//! Reference composition of tracker, history assembler and patch
//! interpreters for a service that stores JSON resources. It decides which
//! body to propose; versions always come from the tracker.

use serde_json::{Map, Value as JsonValue};
use verso_patch::PatchDocument;

use crate::{
    db::SnapshotStore,
    models::{strip_server_meta, ResourceView},
    services::{
        history::{HistoryAssembler, HistoryPage, HistoryRequest},
        tracker::VersionTracker,
    },
    Error, Result,
};

pub const DEFAULT_PATCH_RETRY_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct ResourceService<S: SnapshotStore> {
    tracker: VersionTracker<S>,
    history: HistoryAssembler<S>,
    patch_retry_attempts: u32,
}

impl<S: SnapshotStore> ResourceService<S> {
    pub fn new(store: S) -> Self {
        Self::from_parts(
            VersionTracker::new(store.clone()),
            HistoryAssembler::new(store),
        )
    }

    pub fn from_parts(tracker: VersionTracker<S>, history: HistoryAssembler<S>) -> Self {
        Self {
            tracker,
            history,
            patch_retry_attempts: DEFAULT_PATCH_RETRY_ATTEMPTS,
        }
    }

    /// Total attempts for a patch sent without `If-Match`. At least one.
    pub fn with_patch_retry_attempts(mut self, attempts: u32) -> Self {
        self.patch_retry_attempts = attempts.max(1);
        self
    }

    pub fn tracker(&self) -> &VersionTracker<S> {
        &self.tracker
    }

    pub fn history_assembler(&self) -> &HistoryAssembler<S> {
        &self.history
    }

    /// Create version 1. Without an `id` the server assigns a UUID.
    pub async fn create(
        &self,
        kind: &str,
        id: Option<&str>,
        body: JsonValue,
    ) -> Result<ResourceView> {
        let id = match id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            Some(_) => {
                return Err(Error::InvalidResource(
                    "Resource id must not be empty".to_string(),
                ))
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut obj = into_object(body)?;
        obj.insert("id".to_string(), JsonValue::String(id.clone()));
        strip_server_meta(&mut obj);

        let snapshot = self
            .tracker
            .record_create_snapshot(kind, &id, JsonValue::Object(obj))
            .await?;
        Ok(ResourceView::from_snapshot(&snapshot))
    }

    pub async fn read(&self, kind: &str, id: &str) -> Result<ResourceView> {
        self.history.current_view(kind, id).await
    }

    pub async fn vread(&self, kind: &str, id: &str, version: i32) -> Result<ResourceView> {
        self.history.version_view(kind, id, version).await
    }

    pub async fn history(
        &self,
        kind: &str,
        id: &str,
        request: &HistoryRequest,
    ) -> Result<HistoryPage> {
        self.history.history(kind, id, request).await
    }

    pub async fn search(&self, kind: &str, ids: &[&str]) -> Result<Vec<ResourceView>> {
        self.history.current_views(kind, ids).await
    }

    /// Replace the body. `if_match` is the expected version; without it the
    /// current version is read first.
    pub async fn update(
        &self,
        kind: &str,
        id: &str,
        if_match: Option<i32>,
        body: JsonValue,
    ) -> Result<ResourceView> {
        let mut obj = into_object(body)?;
        if let Some(body_id) = obj.get("id") {
            if body_id.as_str() != Some(id) {
                return Err(Error::InvalidResource(format!(
                    "Resource id {} does not match URL id '{}'",
                    body_id, id
                )));
            }
        }
        obj.insert("id".to_string(), JsonValue::String(id.to_string()));
        strip_server_meta(&mut obj);

        let expected = match if_match {
            Some(version) => version,
            None => self.tracker.current_version(kind, id).await?,
        };

        let snapshot = self
            .tracker
            .record_update_snapshot(kind, id, expected, JsonValue::Object(obj))
            .await?;
        Ok(ResourceView::from_snapshot(&snapshot))
    }

    /// Apply a patch to the current body and record the result.
    ///
    /// With `if_match` a stale version fails before the patch runs and a lost
    /// race is reported as is. Without it a lost race re-reads and re-applies,
    /// up to the configured number of attempts.
    pub async fn patch(
        &self,
        kind: &str,
        id: &str,
        if_match: Option<i32>,
        patch: &PatchDocument,
    ) -> Result<ResourceView> {
        let mut attempt = 1;
        loop {
            let current = self.history.current_view(kind, id).await?;
            if let Some(expected) = if_match {
                if current.version != expected {
                    return Err(Error::VersionConflict {
                        expected,
                        actual: current.version,
                    });
                }
            }

            let patched = patch.apply(&current.body)?;
            let patched = restamp_identity(&current.body, patched, id)?;

            match self
                .tracker
                .record_update_snapshot(kind, id, current.version, patched)
                .await
            {
                Ok(snapshot) => return Ok(ResourceView::from_snapshot(&snapshot)),
                Err(e)
                    if e.is_version_conflict()
                        && if_match.is_none()
                        && attempt < self.patch_retry_attempts =>
                {
                    tracing::warn!(
                        "{} patch of {}/{} lost a version race (attempt {} of {}), retrying",
                        patch.format(),
                        kind,
                        id,
                        attempt,
                        self.patch_retry_attempts
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete and return the version of the delete snapshot.
    pub async fn delete(&self, kind: &str, id: &str, if_match: Option<i32>) -> Result<i32> {
        let expected = match if_match {
            Some(version) => version,
            None => self.tracker.current_version(kind, id).await?,
        };
        self.tracker.record_delete(kind, id, expected).await
    }
}

fn into_object(body: JsonValue) -> Result<Map<String, JsonValue>> {
    match body {
        JsonValue::Object(obj) => Ok(obj),
        other => Err(Error::InvalidResource(format!(
            "Resource body must be a JSON object, got {}",
            verso_patch::JsonKind::of(&other)
        ))),
    }
}

/// Patches cannot change identity: `id` is always the key's id and a
/// `resourceType` present before the patch is kept. The server meta the
/// patch saw on the current view is dropped again.
fn restamp_identity(before: &JsonValue, patched: JsonValue, id: &str) -> Result<JsonValue> {
    let mut obj = into_object(patched).map_err(|_| {
        Error::InvalidResource("Patched resource must be a JSON object".to_string())
    })?;
    obj.insert("id".to_string(), JsonValue::String(id.to_string()));
    if let Some(resource_type) = before.get("resourceType") {
        obj.insert("resourceType".to_string(), resource_type.clone());
    }
    strip_server_meta(&mut obj);
    Ok(JsonValue::Object(obj))
}

//! Version tracker
//!
//! The only writer of the snapshot store. Every successful call appends
//! exactly one snapshot; every rejected call appends nothing. The
//! read-compare-write of each operation is a single `snapshot_append`, so
//! two writers holding the same expected version can never both succeed.

use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;

use crate::{
    db::SnapshotStore,
    models::{ExpectedVersion, ResourceKey, Snapshot, SnapshotAction},
    Error, Result,
};

#[derive(Clone)]
pub struct VersionTracker<S: SnapshotStore> {
    store: S,
    store_timeout: Option<Duration>,
}

impl<S: SnapshotStore> VersionTracker<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            store_timeout: None,
        }
    }

    /// Bound every store round trip. An elapsed bound becomes
    /// `OutcomeUnknown`: the write may or may not have landed.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn record_create(&self, kind: &str, id: &str, body: JsonValue) -> Result<i32> {
        Ok(self.record_create_snapshot(kind, id, body).await?.version)
    }

    pub async fn record_update(
        &self,
        kind: &str,
        id: &str,
        expected_version: i32,
        new_body: JsonValue,
    ) -> Result<i32> {
        Ok(self
            .record_update_snapshot(kind, id, expected_version, new_body)
            .await?
            .version)
    }

    pub async fn record_delete(&self, kind: &str, id: &str, expected_version: i32) -> Result<i32> {
        Ok(self
            .record_delete_snapshot(kind, id, expected_version)
            .await?
            .version)
    }

    /// Write version 1 of a new resource.
    pub async fn record_create_snapshot(
        &self,
        kind: &str,
        id: &str,
        body: JsonValue,
    ) -> Result<Snapshot> {
        let key = ResourceKey::new(kind, id);
        let result = self
            .append(&key, ExpectedVersion::Absent, SnapshotAction::Create, body)
            .await;
        trace_outcome(SnapshotAction::Create, &key, &result);
        result
    }

    /// Write `expected_version + 1` if the resource is live at `expected_version`.
    pub async fn record_update_snapshot(
        &self,
        kind: &str,
        id: &str,
        expected_version: i32,
        new_body: JsonValue,
    ) -> Result<Snapshot> {
        let key = ResourceKey::new(kind, id);
        let result = self
            .append(
                &key,
                ExpectedVersion::AtVersion(expected_version),
                SnapshotAction::Update,
                new_body,
            )
            .await;
        trace_outcome(SnapshotAction::Update, &key, &result);
        result
    }

    /// Write a terminal delete snapshot carrying the last live body.
    pub async fn record_delete_snapshot(
        &self,
        kind: &str,
        id: &str,
        expected_version: i32,
    ) -> Result<Snapshot> {
        let key = ResourceKey::new(kind, id);
        let result = self.delete_at(&key, expected_version).await;
        trace_outcome(SnapshotAction::Delete, &key, &result);
        result
    }

    /// Current live version. A deleted resource reports `AlreadyDeleted`
    /// with the version of its delete snapshot.
    pub async fn current_version(&self, kind: &str, id: &str) -> Result<i32> {
        let key = ResourceKey::new(kind, id);
        let latest = self.bounded(self.store.snapshot_latest(&key)).await?;
        live_version(&key, latest.as_ref())
    }

    async fn delete_at(&self, key: &ResourceKey, expected_version: i32) -> Result<Snapshot> {
        let latest = self.bounded(self.store.snapshot_latest(key)).await?;
        let actual = live_version(key, latest.as_ref())?;
        if actual != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        // The append re-checks the head, so a writer that slipped in after
        // the read above still loses with VersionConflict.
        let last_body = latest.map(|s| s.body).unwrap_or(JsonValue::Null);
        self.append(
            key,
            ExpectedVersion::AtVersion(expected_version),
            SnapshotAction::Delete,
            last_body,
        )
        .await
    }

    async fn append(
        &self,
        key: &ResourceKey,
        expected: ExpectedVersion,
        action: SnapshotAction,
        body: JsonValue,
    ) -> Result<Snapshot> {
        self.bounded(self.store.snapshot_append(key, expected, action, body))
            .await
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.store_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                Error::OutcomeUnknown(format!(
                    "snapshot store did not answer within {}ms",
                    limit.as_millis()
                ))
            })?,
            None => fut.await,
        }
    }
}

fn live_version(key: &ResourceKey, latest: Option<&Snapshot>) -> Result<i32> {
    match latest {
        None => Err(Error::not_found(key)),
        Some(s) if s.is_delete() => Err(Error::AlreadyDeleted {
            key: key.clone(),
            version: s.version,
        }),
        Some(s) => Ok(s.version),
    }
}

fn trace_outcome(action: SnapshotAction, key: &ResourceKey, result: &Result<Snapshot>) {
    match result {
        Ok(snapshot) => {
            tracing::debug!("Recorded {} of {} at version {}", action, key, snapshot.version);
        }
        Err(
            e @ (Error::VersionConflict { .. }
            | Error::AlreadyExists { .. }
            | Error::AlreadyDeleted { .. }
            | Error::NotFound { .. }),
        ) => {
            tracing::info!("Rejected {} of {}: {}", action, key, e);
        }
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemorySnapshotStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn tracker() -> VersionTracker<InMemorySnapshotStore> {
        VersionTracker::new(InMemorySnapshotStore::new())
    }

    #[tokio::test]
    async fn create_then_update() {
        let t = tracker();
        assert_eq!(t.record_create("Patient", "p1", json!({"a": 1})).await.unwrap(), 1);
        assert_eq!(
            t.record_update("Patient", "p1", 1, json!({"a": 2})).await.unwrap(),
            2
        );
        assert_eq!(t.current_version("Patient", "p1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let t = tracker();
        t.record_create("Patient", "p1", json!({})).await.unwrap();
        t.record_update("Patient", "p1", 1, json!({"x": 1})).await.unwrap();

        let err = t
            .record_update("Patient", "p1", 1, json!({"x": 2}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::VersionConflict {
                expected: 1,
                actual: 2
            }
        ));
        assert_eq!(t.current_version("Patient", "p1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let t = tracker();
        t.record_create("Patient", "p1", json!({})).await.unwrap();
        assert!(matches!(
            t.record_create("Patient", "p1", json!({})).await,
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn update_of_unknown_is_not_found() {
        assert!(matches!(
            tracker().record_update("Patient", "nope", 1, json!({})).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_keeps_last_body_and_is_terminal() {
        let t = tracker();
        t.record_create("Patient", "p1", json!({"name": "A"})).await.unwrap();
        let deleted = t.record_delete_snapshot("Patient", "p1", 1).await.unwrap();
        assert_eq!(deleted.version, 2);
        assert_eq!(deleted.action, SnapshotAction::Delete);
        assert_eq!(deleted.body, json!({"name": "A"}));

        assert!(matches!(
            t.current_version("Patient", "p1").await,
            Err(Error::AlreadyDeleted { version: 2, .. })
        ));
        assert!(matches!(
            t.record_update("Patient", "p1", 2, json!({})).await,
            Err(Error::AlreadyDeleted { .. })
        ));
        assert!(matches!(
            t.record_delete("Patient", "p1", 2).await,
            Err(Error::AlreadyDeleted { .. })
        ));
    }

    #[tokio::test]
    async fn stale_delete_conflicts() {
        let t = tracker();
        t.record_create("Patient", "p1", json!({})).await.unwrap();
        t.record_update("Patient", "p1", 1, json!({})).await.unwrap();
        assert!(matches!(
            t.record_delete("Patient", "p1", 1).await,
            Err(Error::VersionConflict {
                expected: 1,
                actual: 2
            })
        ));
    }

    /// Store that never answers.
    #[derive(Clone)]
    struct StalledStore;

    #[async_trait]
    impl SnapshotStore for StalledStore {
        async fn snapshot_append(
            &self,
            _key: &ResourceKey,
            _expected: ExpectedVersion,
            _action: SnapshotAction,
            _body: JsonValue,
        ) -> Result<Snapshot> {
            std::future::pending().await
        }

        async fn snapshot_latest(&self, _key: &ResourceKey) -> Result<Option<Snapshot>> {
            std::future::pending().await
        }

        async fn snapshot_version(
            &self,
            _key: &ResourceKey,
            _version: i32,
        ) -> Result<Option<Snapshot>> {
            std::future::pending().await
        }

        async fn snapshot_history(
            &self,
            _key: &ResourceKey,
            _query: &crate::models::HistoryQuery,
        ) -> Result<crate::models::HistorySlice> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn elapsed_store_timeout_is_outcome_unknown() {
        let t = VersionTracker::new(StalledStore).with_store_timeout(Duration::from_millis(20));
        let err = t.record_create("Patient", "p1", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::OutcomeUnknown(_)));
    }
}

//! In-memory `SnapshotStore`
//!
//! Clones share the same storage. Every compare-and-set runs under a single
//! write guard, so racing appends on one key serialize.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{
    db::traits::{check_head, SnapshotStore},
    models::{
        now_micros, ExpectedVersion, HistoryQuery, HistorySlice, ResourceKey, Snapshot,
        SnapshotAction,
    },
    Error, Result,
};

type Histories = HashMap<ResourceKey, Vec<Snapshot>>;

#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    histories: Arc<RwLock<Histories>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with at least one snapshot.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Histories>> {
        self.histories
            .read()
            .map_err(|_| Error::Storage("snapshot read lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Histories>> {
        self.histories
            .write()
            .map_err(|_| Error::Storage("snapshot write lock poisoned".to_string()))
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn snapshot_append(
        &self,
        key: &ResourceKey,
        expected: ExpectedVersion,
        action: SnapshotAction,
        body: JsonValue,
    ) -> Result<Snapshot> {
        let mut histories = self.write()?;
        let latest = histories.get(key).and_then(|history| history.last());

        let version = check_head(key, latest.map(|s| (s.version, s.action)), expected, action)?;

        let now = now_micros();
        let recorded_at = match latest {
            Some(prev) if prev.recorded_at > now => prev.recorded_at,
            _ => now,
        };

        let snapshot = Snapshot {
            key: key.clone(),
            version,
            action,
            body,
            recorded_at,
        };
        histories
            .entry(key.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(snapshot)
    }

    async fn snapshot_latest(&self, key: &ResourceKey) -> Result<Option<Snapshot>> {
        Ok(self
            .read()?
            .get(key)
            .and_then(|history| history.last())
            .cloned())
    }

    async fn snapshot_version(&self, key: &ResourceKey, version: i32) -> Result<Option<Snapshot>> {
        if version < 1 {
            return Ok(None);
        }
        Ok(self
            .read()?
            .get(key)
            .and_then(|history| history.get((version - 1) as usize))
            .cloned())
    }

    async fn snapshot_history(
        &self,
        key: &ResourceKey,
        query: &HistoryQuery,
    ) -> Result<HistorySlice> {
        let histories = self.read()?;
        let Some(history) = histories.get(key) else {
            return Ok(HistorySlice {
                entries: Vec::new(),
                total: 0,
            });
        };

        let matching: Vec<&Snapshot> = history
            .iter()
            .rev()
            .filter(|s| query.before_version.map_or(true, |before| s.version < before))
            .filter(|s| query.since.map_or(true, |since| s.recorded_at >= since))
            .collect();

        Ok(HistorySlice {
            total: matching.len() as i64,
            entries: matching
                .into_iter()
                .take(query.count.max(0) as usize)
                .cloned()
                .collect(),
        })
    }
}

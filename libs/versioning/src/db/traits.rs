//! Core storage trait for resource snapshots

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{
    models::{ExpectedVersion, HistoryQuery, HistorySlice, ResourceKey, Snapshot, SnapshotAction},
    Error, Result,
};

/// Append-only store of versioned snapshots, keyed by [`ResourceKey`].
///
/// Only [`snapshot_append`](SnapshotStore::snapshot_append) writes, and it is
/// a compare-and-set: for one key and one expected head exactly one caller can
/// succeed. Implementations must never hold a lock across calls.
#[async_trait]
pub trait SnapshotStore: Send + Sync + Clone {
    /// Append one snapshot if the key's head matches `expected`.
    ///
    /// The new snapshot gets version `expected.next_version()` and
    /// `recorded_at = max(now, previous recorded_at)`.
    ///
    /// # Errors
    /// * `AlreadyExists` - `expected` is `Absent` but the key has snapshots
    /// * `NotFound` - `expected` is a version but the key has no snapshots
    /// * `AlreadyDeleted` - the latest snapshot is a delete
    /// * `VersionConflict` - the latest version differs from `expected`
    /// * `Storage` - the action does not fit `expected`, or `expected` is
    ///   already `i32::MAX`
    async fn snapshot_append(
        &self,
        key: &ResourceKey,
        expected: ExpectedVersion,
        action: SnapshotAction,
        body: JsonValue,
    ) -> Result<Snapshot>;

    /// Latest snapshot of any action, including a terminal delete.
    async fn snapshot_latest(&self, key: &ResourceKey) -> Result<Option<Snapshot>>;

    async fn snapshot_version(&self, key: &ResourceKey, version: i32) -> Result<Option<Snapshot>>;

    /// Snapshots newest first, filtered and limited by `query`.
    async fn snapshot_history(&self, key: &ResourceKey, query: &HistoryQuery)
        -> Result<HistorySlice>;
}

/// Check an append against the key's current head `(version, action)` and
/// return the version the new snapshot gets.
pub fn check_head(
    key: &ResourceKey,
    head: Option<(i32, SnapshotAction)>,
    expected: ExpectedVersion,
    action: SnapshotAction,
) -> Result<i32> {
    let action_fits = match expected {
        ExpectedVersion::Absent => action == SnapshotAction::Create,
        ExpectedVersion::AtVersion(_) => action != SnapshotAction::Create,
    };
    if !action_fits {
        return Err(Error::Storage(format!(
            "cannot append {} to {} expecting {:?}",
            action, key, expected
        )));
    }
    let next_version = expected.next_version().ok_or_else(|| {
        Error::Storage(format!("{} has no version after {:?}", key, expected))
    })?;

    match (expected, head) {
        (ExpectedVersion::Absent, None) => Ok(next_version),
        (ExpectedVersion::Absent, Some(_)) => Err(Error::AlreadyExists { key: key.clone() }),
        (ExpectedVersion::AtVersion(_), None) => Err(Error::not_found(key)),
        (ExpectedVersion::AtVersion(_), Some((version, SnapshotAction::Delete))) => {
            Err(Error::AlreadyDeleted {
                key: key.clone(),
                version,
            })
        }
        (ExpectedVersion::AtVersion(expected), Some((actual, _))) if expected != actual => {
            Err(Error::VersionConflict { expected, actual })
        }
        (ExpectedVersion::AtVersion(_), Some(_)) => Ok(next_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ResourceKey {
        ResourceKey::new("Observation", "o1")
    }

    #[test]
    fn create_on_empty_key() {
        assert_eq!(
            check_head(&key(), None, ExpectedVersion::Absent, SnapshotAction::Create).unwrap(),
            1
        );
    }

    #[test]
    fn create_on_existing_key() {
        let err = check_head(
            &key(),
            Some((1, SnapshotAction::Create)),
            ExpectedVersion::Absent,
            SnapshotAction::Create,
        )
        .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn update_classification_order() {
        let upd = |head| {
            check_head(
                &key(),
                head,
                ExpectedVersion::AtVersion(2),
                SnapshotAction::Update,
            )
        };
        assert!(matches!(upd(None), Err(Error::NotFound { .. })));
        assert!(matches!(
            upd(Some((5, SnapshotAction::Delete))),
            Err(Error::AlreadyDeleted { version: 5, .. })
        ));
        assert!(matches!(
            upd(Some((3, SnapshotAction::Update))),
            Err(Error::VersionConflict {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(upd(Some((2, SnapshotAction::Update))).unwrap(), 3);
    }

    #[test]
    fn mismatched_action_is_rejected() {
        assert!(matches!(
            check_head(&key(), None, ExpectedVersion::Absent, SnapshotAction::Update),
            Err(Error::Storage(_))
        ));
        assert!(matches!(
            check_head(
                &key(),
                Some((1, SnapshotAction::Create)),
                ExpectedVersion::AtVersion(1),
                SnapshotAction::Create
            ),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn exhausted_version_space_is_a_storage_error() {
        let head = Some((i32::MAX, SnapshotAction::Update));
        for action in [SnapshotAction::Update, SnapshotAction::Delete] {
            assert!(matches!(
                check_head(&key(), head, ExpectedVersion::AtVersion(i32::MAX), action),
                Err(Error::Storage(_))
            ));
        }
    }
}

//! Resource versioning engine
//!
//! - [`VersionTracker`] assigns versions under optimistic concurrency; every
//!   write is one compare-and-set against a [`SnapshotStore`].
//! - [`HistoryAssembler`] reads snapshots back as views, paged history and
//!   bundles.
//! - [`ResourceService`] composes both with the patch interpreters from
//!   `verso-patch`.
//! - [`api`] holds the HTTP-facing pieces: version headers, patch content
//!   negotiation and error responses.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use db::{InMemorySnapshotStore, PostgresSnapshotStore, SnapshotStore};
pub use error::{Error, Result};
pub use models::{ExpectedVersion, ResourceKey, ResourceView, Snapshot, SnapshotAction};
pub use services::{
    HistoryAssembler, HistoryPage, HistoryRequest, ResourceService, VersionTracker,
};

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemorySnapshotStore;
pub use postgres::PostgresSnapshotStore;
pub use traits::SnapshotStore;

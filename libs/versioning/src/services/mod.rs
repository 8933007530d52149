pub mod history;
pub mod resource;
pub mod tracker;

pub use history::{HistoryAssembler, HistoryPage, HistoryRequest};
pub use resource::ResourceService;
pub use tracker::VersionTracker;

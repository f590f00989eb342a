pub mod clock;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod stat;
pub mod store;
pub mod sync;
pub mod upstream;

pub use sync::{SeriesPlan, SyncError, SyncReport, SyncRunner};

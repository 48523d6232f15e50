pub mod actor;
pub mod clock;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod request;
pub mod result;
pub mod retry;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod task;

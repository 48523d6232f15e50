pub mod error;
pub mod manager;
pub mod service;
pub mod settings;
pub mod task;

pub use service::{ClientProvider, SharedClientProvider, WorkloadService};
pub use settings::{EngineSettings, init_tracing};

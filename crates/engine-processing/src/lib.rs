pub mod classifier;
pub mod error;
pub mod executor;
pub mod operation;
pub mod replay;
pub mod retry;
pub mod validate;

pub mod config;
pub mod document;
pub mod error;
pub mod identifiers;
pub mod operation;

pub use config::{ClusterConfig, Exceptions, OperationConfig};
pub use error::ConfigError;
pub use identifiers::{CollectionId, CollectionIdentifier};
pub use operation::OperationKind;

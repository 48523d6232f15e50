use crate::config::ClusterConfig;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub const DEFAULT_SCOPE: &str = "_default";
pub const DEFAULT_COLLECTION: &str = "_default";

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

/// Bucket / scope / collection coordinates of a keyspace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId {
    pub bucket: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl CollectionId {
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }

    pub fn default_in(bucket: impl Into<String>) -> Self {
        Self::new(bucket, DEFAULT_SCOPE, DEFAULT_COLLECTION)
    }
}

/// Fully qualified keyspace identifier: `token:cluster:bucket:scope:collection`.
///
/// Two keyspaces with the same bucket/scope/collection names on different
/// clusters or requests never compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionIdentifier(Arc<str>);

impl CollectionIdentifier {
    pub fn new(token: &str, cluster: &ClusterConfig, coll: &CollectionId) -> Self {
        Self(Arc::from(format!(
            "{}:{}:{}:{}:{}",
            token, cluster.connection_str, coll.bucket, coll.scope, coll.collection
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionIdentifier {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_includes_every_coordinate() {
        let cluster = ClusterConfig::new("couchbase://10.0.0.1");
        let id = CollectionIdentifier::new("req-1", &cluster, &CollectionId::default_in("b"));
        assert_eq!(id.as_str(), "req-1:couchbase://10.0.0.1:b:_default:_default");
    }

    #[test]
    fn same_names_on_other_cluster_differ() {
        let coll = CollectionId::new("b", "s", "c");
        let a = CollectionIdentifier::new("t", &ClusterConfig::new("host-a"), &coll);
        let b = CollectionIdentifier::new("t", &ClusterConfig::new("host-b"), &coll);
        assert_ne!(a, b);
    }
}

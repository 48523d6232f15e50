#![allow(dead_code)]

use engine_core::store::StoreClient;
use engine_runtime::{EngineSettings, SharedClientProvider, WorkloadService};
use model::{ClusterConfig, CollectionId, CollectionIdentifier};
use std::{path::Path, sync::Arc};

pub mod utils;

const REQUEST: &str = "workload";

fn cluster() -> ClusterConfig {
    ClusterConfig::new("mem://local")
}

fn collection() -> CollectionId {
    CollectionId::default_in("bucket")
}

fn identifier() -> CollectionIdentifier {
    CollectionIdentifier::new(REQUEST, &cluster(), &collection())
}

fn settings(dir: &Path) -> EngineSettings {
    EngineSettings {
        max_concurrency: 16,
        ..EngineSettings::in_dir(dir)
    }
}

/// Service over `client` with snapshot and result files under `dir`.
fn service(dir: &Path, client: Arc<dyn StoreClient>) -> WorkloadService {
    WorkloadService::new(settings(dir), Arc::new(SharedClientProvider::new(client)))
        .expect("valid settings")
}

/// Collection seed the service assigned to the test collection.
async fn collection_seed(svc: &WorkloadService) -> i64 {
    let request = svc.request(REQUEST).await.expect("request");
    let meta = request
        .metadata()
        .lookup(&identifier())
        .await
        .expect("collection metadata");
    meta.lock().await.seed
}

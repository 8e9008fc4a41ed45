//! Adapters over the external cloud services.

pub mod function_service;
pub mod gcp_auth;
pub mod gcs_store;
pub mod local_store;
pub mod storage_service;

use crate::config::{AppConfig, StorageBackend};
use gcp_auth::TokenProvider;
use gcs_store::GcsStore;
use local_store::LocalStore;
use std::sync::Arc;
use storage_service::{StorageResult, StorageService};
use tracing::{info, warn};

/// Build the storage adapter the configuration asks for.
pub async fn build_storage(
    cfg: &AppConfig,
    client: reqwest::Client,
) -> StorageResult<StorageService> {
    let bucket = cfg.gcp.storage_bucket.clone();
    match &cfg.backend {
        StorageBackend::Local { root } => {
            info!("using local storage backend at {}", root.display());
            Ok(StorageService::new(Arc::new(LocalStore::new(root, bucket))))
        }
        StorageBackend::Gcs => {
            let (endpoint, auth) = match (&cfg.gcp.storage_emulator, &cfg.gcp.credentials) {
                (Some(emulator), _) => {
                    info!("using storage emulator at {}", emulator);
                    (emulator_url(emulator), TokenProvider::anonymous(client.clone()))
                }
                (None, Some(path)) => (
                    gcs_store::DEFAULT_ENDPOINT.to_string(),
                    TokenProvider::from_key_file(client.clone(), path).await?,
                ),
                (None, None) => {
                    warn!("GOOGLE_APPLICATION_CREDENTIALS not set; using metadata server credentials");
                    (
                        gcs_store::DEFAULT_ENDPOINT.to_string(),
                        TokenProvider::metadata_server(client.clone()),
                    )
                }
            };
            let store = GcsStore::new(client, &endpoint, bucket, auth)?;
            Ok(StorageService::new(Arc::new(store)))
        }
    }
}

/// `STORAGE_EMULATOR_HOST` may be given with or without a scheme.
fn emulator_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

//! Web console over one cloud storage bucket and one HTTP cloud function.
//!
//! The `gcp-console` binary serves the API and the browser client, `console`
//! drives the same API from a terminal, and `deploy` provisions the cloud
//! resources through the `gcloud`/`gsutil` CLIs.

pub mod client;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Load `.env`, then install the subscriber so `RUST_LOG` from the file applies.
pub fn init_env_and_tracing() {
    let loaded = dotenvy::dotenv();
    init_tracing();
    if let Some(message) = describe_dotenv(&loaded) {
        tracing::warn!("{}", message);
    } else if let Ok(path) = &loaded {
        tracing::debug!("loaded environment from {}", path.display());
    }
}

/// Warning for a `.env` that exists but could not be loaded. A missing file is fine.
fn describe_dotenv(loaded: &Result<PathBuf, dotenvy::Error>) -> Option<String> {
    match loaded {
        Ok(_) => None,
        Err(err) if err.not_found() => None,
        Err(err) => Some(format!("could not load .env: {}", err)),
    }
}

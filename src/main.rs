use anyhow::{Context, Result};
use gcp_console::{
    config::AppConfig,
    routes::routes,
    services::{self, function_service::FunctionService},
    state::AppState,
};
use std::{io::ErrorKind, path::Path};
use tokio::{fs, net::TcpListener, signal};

#[tokio::main]
async fn main() -> Result<()> {
    // --- .env + logging setup ---
    gcp_console::init_env_and_tracing();

    // --- Parse config (environment + CLI) ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting gcp-console with config: {:?}", cfg);

    // --- Ensure scratch directories exist ---
    ensure_dir(&cfg.uploads_dir).await?;
    ensure_dir(&cfg.downloads_dir).await?;
    if !cfg.static_dir.join("index.html").exists() {
        tracing::warn!(
            "no index.html under {}; the fallback route will answer 404",
            cfg.static_dir.display()
        );
    }

    // --- Initialize adapters ---
    let client = reqwest::Client::new();
    let storage = services::build_storage(&cfg, client.clone())
        .await
        .context("initializing storage adapter")?;
    let functions = FunctionService::new(client, cfg.gcp.function_url());
    tracing::info!(
        bucket = storage.bucket(),
        function = functions.url(),
        "adapters ready"
    );

    let state = AppState {
        storage,
        functions,
        uploads_dir: cfg.uploads_dir.clone(),
        downloads_dir: cfg.downloads_dir.clone(),
    };

    // --- Build router ---
    let app = routes::app(state, &cfg.static_dir, cfg.max_upload_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Create a scratch directory; an existing one is fine.
async fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .await
            .with_context(|| format!("creating directory {}", path.display()))?;
        tracing::info!("Created directory {}", path.display());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

//! Defines the HTTP surface.
//!
//! ## Structure
//! - **Storage endpoints** (under `/api`)
//!   - `GET    /storage/files` -> list objects in the bucket
//!   - `POST   /storage/upload` -> multipart upload, field `file`
//!   - `GET    /storage/download/{file_name}` -> object body as an attachment
//!   - `DELETE /storage/delete/{file_name}` -> delete one object
//!
//! - **Function endpoint** (under `/api`)
//!   - `POST   /function/call` -> forward a JSON payload to the cloud function
//!
//! - **Everything else**: static assets, with `index.html` answering any
//!   path that matches no file so client-side routes resolve.

use crate::{
    handlers::{
        function_handlers::call_function,
        health_handlers::{healthz, readyz},
        storage_handlers::{delete_file, download_file, list_files, upload_file},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use std::path::Path;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

/// Routes mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/storage/files", get(list_files))
        .route("/storage/upload", post(upload_file))
        .route("/storage/download/{file_name}", get(download_file))
        .route("/storage/delete/{file_name}", delete(delete_file))
        .route("/function/call", post(call_function))
}

/// Build the complete application router.
///
/// `static_dir` must contain `index.html`; it is served for `/` and for
/// every GET that matches neither an API route nor an asset.
pub fn app(state: AppState, static_dir: &Path, max_upload_bytes: usize) -> Router {
    let index = ServeFile::new(static_dir.join("index.html"));
    let assets = ServeDir::new(static_dir).fallback(index);

    Router::new()
        .nest("/api", api_routes())
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .fallback_service(assets)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

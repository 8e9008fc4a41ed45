use crate::services::{function_service::FunctionService, storage_service::StorageService};
use std::path::PathBuf;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub functions: FunctionService,
    /// Scratch directory for multipart uploads before they go to the bucket.
    pub uploads_dir: PathBuf,
    /// Scratch directory objects are downloaded into before streaming out.
    pub downloads_dir: PathBuf,
}

//! src/services/storage_service.rs
//!
//! StorageService: list/upload/download/delete against the one configured
//! bucket. The actual transport lives behind [`ObjectStore`]: the Cloud
//! Storage JSON API in production, a directory on disk for development and
//! tests.

use crate::models::file::FileDescriptor;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{name}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, name: String },
    #[error("invalid object name `{0}`")]
    InvalidObjectName(String),
    #[error("storage API returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("could not obtain credentials: {0}")]
    Auth(String),
    #[error("checksum mismatch for `{name}`: sent {expected}, stored {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Cache-Control applied to every uploaded object.
pub const UPLOAD_CACHE_CONTROL: &str = "public, max-age=31536000";

/// One bucket's worth of object operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store is bound to.
    fn bucket(&self) -> &str;

    /// Every object in the bucket, in name order.
    async fn list(&self) -> StorageResult<Vec<FileDescriptor>>;

    /// Copy `source` into the bucket as `name`, replacing any existing
    /// object, and return its public URL.
    async fn upload(
        &self,
        source: &Path,
        name: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String>;

    /// Write object `name` to `destination` and return its content type.
    async fn download(&self, name: &str, destination: &Path) -> StorageResult<String>;

    /// Remove object `name`. Missing objects are an error.
    async fn delete(&self, name: &str) -> StorageResult<()>;
}

const MAX_OBJECT_NAME_LEN: usize = 1024;

/// A downloaded object on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub content_type: String,
}

/// Storage adapter handed to the HTTP handlers.
///
/// Cheap to clone; every clone shares the same underlying store.
#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn ObjectStore>,
}

impl StorageService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    /// Names the storage API would refuse: empty, over 1024 bytes, exactly
    /// `.` or `..`, or carrying control characters. `/` is allowed; stores
    /// that map names onto the file system apply their own rules.
    pub fn ensure_name_valid(name: &str) -> StorageResult<()> {
        let invalid = || StorageError::InvalidObjectName(name.to_string());
        if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
            return Err(invalid());
        }
        if name == "." || name == ".." {
            return Err(invalid());
        }
        if name.chars().any(char::is_control) {
            return Err(invalid());
        }
        Ok(())
    }

    /// List every object in the bucket. An empty bucket is an empty vec.
    pub async fn list_files(&self) -> StorageResult<Vec<FileDescriptor>> {
        self.store.list().await.inspect_err(|err| {
            error!(bucket = self.bucket(), "error listing files: {}", err);
        })
    }

    /// Upload `local_path` as `destination` and return the object's public URL.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        destination: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        Self::ensure_name_valid(destination)?;
        self.store
            .upload(local_path, destination, content_type)
            .await
            .inspect_err(|err| {
                error!(name = destination, "error uploading file: {}", err);
            })
    }

    /// Download object `name` into `destination`.
    pub async fn download_file(
        &self,
        name: &str,
        destination: &Path,
    ) -> StorageResult<DownloadedFile> {
        Self::ensure_name_valid(name)?;
        match self.store.download(name, destination).await {
            Ok(content_type) => Ok(DownloadedFile {
                path: destination.to_path_buf(),
                content_type,
            }),
            Err(err) => {
                error!(name, "error downloading file: {}", err);
                let _ = tokio::fs::remove_file(destination).await;
                Err(err)
            }
        }
    }

    /// Delete object `name`. Deleting a missing object fails.
    pub async fn delete_file(&self, name: &str) -> StorageResult<bool> {
        Self::ensure_name_valid(name)?;
        self.store.delete(name).await.inspect_err(|err| {
            error!(name, "error deleting file: {}", err);
        })?;
        Ok(true)
    }
}

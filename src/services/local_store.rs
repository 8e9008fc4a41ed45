//! Disk-backed [`ObjectStore`] for development and tests.
//!
//! Layout: `{root}/{bucket}/objects/{name}` holds the payload and
//! `{root}/{bucket}/meta/{name}.json` holds what Cloud Storage would keep as
//! object metadata (content type, cache control, MD5, size, update time).

use crate::{
    models::file::{DEFAULT_CONTENT_TYPE, FileDescriptor},
    services::storage_service::{ObjectStore, StorageError, StorageResult, UPLOAD_CACHE_CONTROL},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    content_type: String,
    cache_control: String,
    md5_hash: String,
    size: u64,
    updated: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct LocalStore {
    bucket: String,
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let mut base_path = root.into();
        base_path.push(&bucket);
        Self { bucket, base_path }
    }

    fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    fn meta_dir(&self) -> PathBuf {
        self.base_path.join("meta")
    }

    /// Objects are flat files, so a name must be a single path segment.
    fn object_path(&self, name: &str) -> StorageResult<PathBuf> {
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::InvalidObjectName(name.to_string()));
        }
        Ok(self.objects_dir().join(name))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.meta_dir().join(format!("{}.json", name))
    }

    fn not_found(&self, name: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: self.bucket.clone(),
            name: name.to_string(),
        }
    }

    /// Read the sidecar, falling back to filesystem metadata when it is gone.
    async fn describe(&self, name: &str, path: &Path) -> StorageResult<FileDescriptor> {
        match fs::read(self.meta_path(name)).await {
            Ok(raw) => {
                let meta: ObjectMeta = serde_json::from_slice(&raw)?;
                Ok(FileDescriptor {
                    name: name.to_string(),
                    size: meta.size,
                    content_type: meta.content_type,
                    updated_at: meta.updated,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let stat = fs::metadata(path).await?;
                let updated_at = stat
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(FileDescriptor {
                    name: name.to_string(),
                    size: stat.len(),
                    content_type: DEFAULT_CONTENT_TYPE.to_string(),
                    updated_at,
                })
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Write `bytes` to `path` through a temp file in the same directory.
    async fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "path missing parent directory"))?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        if let Err(err) = fs::write(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        fs::rename(&tmp_path, path).await
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self) -> StorageResult<Vec<FileDescriptor>> {
        let mut entries = match fs::read_dir(self.objects_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!("skipping non UTF-8 object name {:?}", entry.file_name());
                continue;
            };
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            files.push(self.describe(&name, &entry.path()).await?);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Stream `source` into the bucket.
    ///
    /// - Copies incrementally into a temp file while computing the MD5.
    /// - Renames into place, replacing any previous object of that name.
    /// - Writes the metadata sidecar last.
    async fn upload(
        &self,
        source: &Path,
        name: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let file_path = self.object_path(name)?;
        let objects_dir = self.objects_dir();
        fs::create_dir_all(&objects_dir).await?;
        fs::create_dir_all(self.meta_dir()).await?;

        let input = File::open(source).await?;
        let tmp_path = objects_dir.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        let mut digest = md5::Context::new();
        let mut stream = ReaderStream::new(input);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let meta = ObjectMeta {
            content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            cache_control: UPLOAD_CACHE_CONTROL.to_string(),
            md5_hash: general_purpose::STANDARD.encode(digest.compute().0),
            size,
            updated: Utc::now(),
        };
        Self::write_atomically(&self.meta_path(name), &serde_json::to_vec_pretty(&meta)?).await?;
        debug!(name, size, "stored object in {}", file_path.display());

        let absolute = fs::canonicalize(&file_path).await?;
        Ok(url::Url::from_file_path(&absolute)
            .map(String::from)
            .unwrap_or_else(|_| absolute.display().to_string()))
    }

    async fn download(&self, name: &str, destination: &Path) -> StorageResult<String> {
        let path = self.object_path(name)?;
        match fs::copy(&path, destination).await {
            Ok(_) => Ok(self.describe(name, &path).await?.content_type),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(self.not_found(name)),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        match fs::remove_file(self.object_path(name)?).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(self.not_found(name)),
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Err(err) = fs::remove_file(self.meta_path(name)).await {
            debug!(name, "metadata sidecar not removed: {}", err);
        }
        Ok(())
    }
}

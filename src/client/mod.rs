//! Client side of the console: an HTTP client for the `/api` routes and the
//! panel state machine the browser and terminal front ends share.

pub mod ui;

use crate::models::{
    envelope::{FilesBody, MessageBody, ResultBody, UploadBody},
    file::FileDescriptor,
};
use futures::StreamExt;
use reqwest::{Response, StatusCode, multipart};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{io, path::Path};
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered `{"success": false, "error": ...}`.
    #[error("{0}")]
    Api(String),
    #[error("server returned {0}")]
    Status(StatusCode),
    #[error("`{0}` has no file name")]
    NoFileName(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Typed access to a running console server.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Url(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    /// `{base}/api/{segments...}` with each segment percent-encoded.
    fn api_url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    /// Unwrap the `{success, ...}` envelope into `T` or a `ClientError::Api`.
    async fn envelope<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        let bytes = response.bytes().await?;
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) if !status.is_success() => return Err(ClientError::Status(status)),
            Err(err) => return Err(ClientError::Json(err)),
        };
        if value.get("success").and_then(Value::as_bool) == Some(true) {
            return Ok(serde_json::from_value(value)?);
        }
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("server returned {}", status));
        Err(ClientError::Api(message))
    }

    pub async fn list_files(&self) -> ClientResult<Vec<FileDescriptor>> {
        let response = self
            .client
            .get(self.api_url(&["storage", "files"])?)
            .send()
            .await?;
        Ok(Self::envelope::<FilesBody>(response).await?.files)
    }

    /// Upload a local file under its own file name; returns the public URL.
    pub async fn upload_file(&self, path: &Path) -> ClientResult<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::NoFileName(path.display().to_string()))?
            .to_string();
        let file = File::open(path).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, length).file_name(file_name);
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.api_url(&["storage", "upload"])?)
            .multipart(form)
            .send()
            .await?;
        Ok(Self::envelope::<UploadBody>(response).await?.file_url)
    }

    /// Save object `name` to `destination`; returns the byte count.
    pub async fn download_file(&self, name: &str, destination: &Path) -> ClientResult<u64> {
        let response = self
            .client
            .get(self.api_url(&["storage", "download", name])?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::envelope::<Value>(response)
                .await
                .err()
                .unwrap_or_else(|| ClientError::Api("download failed".into())));
        }

        let mut file = File::create(destination).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }

    pub async fn delete_file(&self, name: &str) -> ClientResult<String> {
        let response = self
            .client
            .delete(self.api_url(&["storage", "delete", name])?)
            .send()
            .await?;
        Ok(Self::envelope::<MessageBody>(response).await?.message)
    }

    pub async fn call_function(&self, payload: &Value) -> ClientResult<Value> {
        let response = self
            .client
            .post(self.api_url(&["function", "call"])?)
            .json(payload)
            .send()
            .await?;
        Ok(Self::envelope::<ResultBody>(response).await?.result)
    }
}

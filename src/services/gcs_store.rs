//! [`ObjectStore`] backed by the Cloud Storage JSON API.
//!
//! Only four calls are used: `objects.list` (following page tokens),
//! a `multipart/related` media upload, `objects.get?alt=media` and
//! `objects.delete`.

use crate::{
    models::file::{DEFAULT_CONTENT_TYPE, FileDescriptor},
    services::{
        gcp_auth::TokenProvider,
        storage_service::{ObjectStore, StorageError, StorageResult, UPLOAD_CACHE_CONTROL},
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, future, stream};
use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use std::{
    io,
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    /// The API sends sizes as decimal strings.
    size: Option<String>,
    content_type: Option<String>,
    updated: Option<DateTime<Utc>>,
    md5_hash: Option<String>,
}

impl From<ObjectResource> for FileDescriptor {
    fn from(object: ObjectResource) -> Self {
        Self {
            size: object
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            content_type: object
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            updated_at: object.updated.unwrap_or_else(Utc::now),
            name: object.name,
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct GcsStore {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    auth: TokenProvider,
}

impl GcsStore {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        bucket: impl Into<String>,
        auth: TokenProvider,
    ) -> StorageResult<Self> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::Url(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            auth,
        })
    }

    /// `{endpoint}/{segments...}`, each segment percent-encoded.
    fn endpoint_with(&self, segments: &[&str]) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn objects_url(&self) -> StorageResult<Url> {
        self.endpoint_with(&["storage", "v1", "b", self.bucket.as_str(), "o"])
    }

    fn object_url(&self, name: &str) -> StorageResult<Url> {
        self.endpoint_with(&["storage", "v1", "b", self.bucket.as_str(), "o", name])
    }

    fn upload_url(&self) -> StorageResult<Url> {
        let mut url =
            self.endpoint_with(&["upload", "storage", "v1", "b", self.bucket.as_str(), "o"])?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");
        Ok(url)
    }

    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.bucket,
            name
        )
    }

    async fn authorize(&self, request: RequestBuilder) -> StorageResult<RequestBuilder> {
        Ok(match self.auth.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    /// Map a non-2xx response to a StorageError. A 404 on a named object
    /// becomes `ObjectNotFound`.
    async fn check(&self, response: Response, name: Option<&str>) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if let (StatusCode::NOT_FOUND, Some(name)) = (status, name) {
            return Err(StorageError::ObjectNotFound {
                bucket: self.bucket.clone(),
                name: name.to_string(),
            });
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);
        Err(StorageError::Api { status, message })
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self) -> StorageResult<Vec<FileDescriptor>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.objects_url()?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let request = self.authorize(self.client.get(url)).await?;
            let response = self.check(request.send().await?, None).await?;
            let page: ObjectList = response.json().await?;

            files.extend(page.items.into_iter().map(FileDescriptor::from));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    /// One-shot `multipart/related` upload: a JSON metadata part followed by
    /// the media part, streamed from disk while the MD5 is computed.
    async fn upload(
        &self,
        source: &Path,
        name: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let file = File::open(source).await?;
        let file_len = file.metadata().await?.len();
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);

        let metadata = json!({
            "name": name,
            "contentType": content_type,
            "cacheControl": UPLOAD_CACHE_CONTROL,
        });
        let boundary = format!("gcp-console-{}", Uuid::new_v4().simple());
        let mut head = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n",
            b = boundary
        )
        .into_bytes();
        head.extend(serde_json::to_vec(&metadata)?);
        head.extend(format!("\r\n--{}\r\nContent-Type: {}\r\n\r\n", boundary, content_type).bytes());
        let tail = Bytes::from(format!("\r\n--{}--\r\n", boundary));
        let head = Bytes::from(head);
        let body_len = head.len() as u64 + file_len + tail.len() as u64;

        let digest = Arc::new(Mutex::new(md5::Context::new()));
        let media = {
            let digest = Arc::clone(&digest);
            ReaderStream::new(file).inspect(move |chunk| {
                if let (Ok(chunk), Ok(mut digest)) = (chunk, digest.lock()) {
                    digest.consume(chunk);
                }
            })
        };
        let body = stream::once(future::ready(Ok::<_, io::Error>(head)))
            .chain(media)
            .chain(stream::once(future::ready(Ok(tail))));

        let request = self
            .client
            .post(self.upload_url()?)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .header(header::CONTENT_LENGTH, body_len)
            .body(reqwest::Body::wrap_stream(body));
        let request = self.authorize(request).await?;
        let response = self.check(request.send().await?, None).await?;
        let stored: ObjectResource = response.json().await?;

        let expected_md5 = {
            let mut digest = digest
                .lock()
                .map_err(|_| StorageError::Io(io::Error::other("md5 state poisoned")))?;
            let computed = std::mem::replace(&mut *digest, md5::Context::new()).compute();
            general_purpose::STANDARD.encode(computed.0)
        };
        if let Some(actual) = stored.md5_hash {
            if actual != expected_md5 {
                return Err(StorageError::ChecksumMismatch {
                    name: name.to_string(),
                    expected: expected_md5,
                    actual,
                });
            }
        }
        debug!(name, bytes = file_len, "uploaded object");
        Ok(self.public_url(name))
    }

    async fn download(&self, name: &str, destination: &Path) -> StorageResult<String> {
        let mut url = self.object_url(name)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let request = self.authorize(self.client.get(url)).await?;
        let response = self.check(request.send().await?, Some(name)).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(content_type)
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let request = self
            .authorize(self.client.delete(self.object_url(name)?))
            .await?;
        self.check(request.send().await?, Some(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> GcsStore {
        let client = reqwest::Client::new();
        GcsStore::new(
            client.clone(),
            &server.uri(),
            "bucket",
            TokenProvider::anonymous(client),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn list_follows_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"name": "b.png", "size": "2048", "contentType": "image/png",
                           "updated": "2025-03-01T10:00:00.000Z"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"name": "a.txt", "size": "12", "contentType": "text/plain",
                           "updated": "2025-02-01T10:00:00.000Z"}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let files = store(&server).list().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.png"]);
        assert_eq!(files[1].size, 2048);
        assert_eq!(files[0].content_type, "text/plain");
    }

    #[tokio::test]
    async fn empty_bucket_has_no_items_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "storage#objects"})))
            .mount(&server)
            .await;
        assert!(store(&server).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_sends_metadata_and_verifies_checksum() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/bucket/o"))
            .and(query_param("uploadType", "multipart"))
            .and(body_string_contains(r#""cacheControl":"public, max-age=31536000""#))
            .and(body_string_contains("hello world"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "a.txt", "size": "11", "md5Hash": "XrY7u+Ae7tCTyyK7j1rNww=="
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        tokio::fs::write(&source, b"hello world").await.unwrap();

        let store = store(&server);
        let url = store.upload(&source, "a.txt", Some("text/plain")).await.unwrap();
        assert_eq!(url, format!("{}/bucket/a.txt", server.uri()));
    }

    #[tokio::test]
    async fn large_upload_arrives_whole_with_declared_length() {
        let server = MockServer::start().await;
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let media_len = payload.len();
        // Answer with the md5 of the media part as received.
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/bucket/o"))
            .respond_with(move |req: &wiremock::Request| {
                let declared = req
                    .headers
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<usize>().ok());
                if declared != Some(req.body.len()) {
                    return ResponseTemplate::new(400);
                }
                let start = req
                    .body
                    .windows(4)
                    .enumerate()
                    .filter(|(_, w)| *w == b"\r\n\r\n")
                    .nth(1)
                    .map(|(i, _)| i + 4)
                    .unwrap_or(0);
                let end = (start + media_len).min(req.body.len());
                let received = general_purpose::STANDARD.encode(md5::compute(&req.body[start..end]).0);
                ResponseTemplate::new(200).set_body_json(json!({"name": "big.bin", "md5Hash": received}))
            })
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        tokio::fs::write(&source, &payload).await.unwrap();

        let url = store(&server).upload(&source, "big.bin", None).await.unwrap();
        assert!(url.ends_with("/bucket/big.bin"));
    }

    #[tokio::test]
    async fn upload_with_mismatched_checksum_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "a.txt", "md5Hash": "AAAAAAAAAAAAAAAAAAAAAA=="
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        tokio::fs::write(&source, b"hello world").await.unwrap();

        let err = store(&server).upload(&source, "a.txt", None).await.unwrap_err();
        assert!(matches!(err, StorageError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn download_streams_media_to_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o/report%201.csv"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"a,b\n1,2\n".to_vec(), "text/csv"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.csv");
        let content_type = store(&server).download("report 1.csv", &dest).await.unwrap();
        assert_eq!(content_type, "text/csv");
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn missing_object_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/b/bucket/o/missing.txt"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "No such object: bucket/missing.txt"}
            })))
            .mount(&server)
            .await;

        let err = store(&server).delete("missing.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { ref name, .. } if name == "missing.txt"));
    }

    #[tokio::test]
    async fn api_errors_carry_the_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "caller does not have storage.objects.list access"}
            })))
            .mount(&server)
            .await;

        let err = store(&server).list().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "storage API returned 403 Forbidden: caller does not have storage.objects.list access"
        );
    }
}

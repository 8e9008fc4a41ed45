//! HTTP handlers for the bucket routes.
//! Uploads are spooled to the uploads scratch directory, downloads are
//! fetched into the downloads scratch directory and streamed back.

use crate::{
    errors::AppError,
    models::{
        envelope::{Envelope, FilesBody, MessageBody, UploadBody},
        file::DEFAULT_CONTENT_TYPE,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::PathBuf;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const UPLOAD_FIELD: &str = "file";

/// `GET /api/storage/files`
pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<Envelope<FilesBody>>, AppError> {
    let files = state.storage.list_files().await?;
    Ok(Json(Envelope::ok(FilesBody { files })))
}

/// `POST /api/storage/upload`: multipart form with a `file` part.
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Envelope<UploadBody>>, AppError> {
    let Ok(mut multipart) = multipart else {
        return Err(AppError::bad_request("No file uploaded"));
    };

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        // A `file` part without a filename is a plain form value, not a file.
        // Browsers send `filename=""` when nothing was picked.
        let Some(original_name) = field
            .file_name()
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let scratch = state.uploads_dir.join(Uuid::new_v4().to_string());
        let spooled = async {
            let mut file = File::create(&scratch).await?;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|err| AppError::new(err.status(), err.body_text()))?
            {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<_, AppError>(())
        }
        .await;

        let result = match spooled {
            Ok(()) => state
                .storage
                .upload_file(&scratch, &original_name, content_type.as_deref())
                .await
                .map_err(AppError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = fs::remove_file(&scratch).await {
            debug!("could not remove upload scratch file {}: {}", scratch.display(), err);
        }

        let file_url = result?;
        return Ok(Json(Envelope::ok(UploadBody { file_url })));
    }

    Err(AppError::bad_request("No file uploaded"))
}

/// `GET /api/storage/download/{file_name}`: object body as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let scratch: PathBuf = state
        .downloads_dir
        .join(format!("{}-{}", Uuid::new_v4(), scratch_suffix(&file_name)));
    let downloaded = state.storage.download_file(&file_name, &scratch).await?;

    let file = File::open(&downloaded.path).await?;
    let length = file.metadata().await?.len();
    // The open handle keeps the data readable after the unlink on Unix.
    if let Err(err) = fs::remove_file(&downloaded.path).await {
        debug!("download scratch file {} kept: {}", downloaded.path.display(), err);
    }

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&downloaded.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&file_name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    Ok(response)
}

/// `DELETE /api/storage/delete/{file_name}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Json<Envelope<MessageBody>>, AppError> {
    state.storage.delete_file(&file_name).await?;
    Ok(Json(Envelope::ok(MessageBody {
        message: format!("File {} deleted successfully", file_name),
    })))
}

/// `attachment` disposition with an ASCII fallback name and the exact
/// UTF-8 name in `filename*`.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(file_name, ATTR_CHAR_ENCODE)
    )
}

/// Everything outside RFC 5987 `attr-char` is percent-encoded.
const ATTR_CHAR_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Longest object-name tail kept in a scratch file name.
const SCRATCH_SUFFIX_CHARS: usize = 48;

/// Local file-name part of a download scratch path. Object names may
/// contain separators; the scratch file must stay inside the directory.
fn scratch_suffix(name: &str) -> String {
    name.chars()
        .take(SCRATCH_SUFFIX_CHARS)
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

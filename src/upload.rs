//! Persists the multipart upload of `POST /convert` to the upload directory.

use crate::api::ApiError;
use crate::convert::ConversionRequest;
use crate::utils::remove_file_quietly;
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Form field carrying the media file.
pub const INPUT_FILE_FIELD: &str = "inputFile";

/// An input file stored on disk, owned by the job that converts it.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub path: PathBuf,
    /// Name the client gave the file, used to name the output
    pub original_name: String,
    pub size: u64,
}

/// Read every field of the form: the file goes to `upload_dir/<uuid>`, the
/// text fields become the conversion request.
///
/// Nothing is left on disk when an error is returned.
pub async fn receive_upload(
    mut multipart: Multipart,
    upload_dir: &Path,
    max_file_size: u64,
) -> Result<(Option<UploadedFile>, ConversionRequest), ApiError> {
    let mut upload = None;
    let mut request = ConversionRequest::default();

    let result = read_fields(
        &mut multipart,
        upload_dir,
        max_file_size,
        &mut upload,
        &mut request,
    )
    .await;

    if let Err(error) = result {
        if let Some(upload) = upload.take() {
            remove_file_quietly(&upload.path).await;
        }
        return Err(error);
    }

    Ok((upload, request))
}

async fn read_fields(
    multipart: &mut Multipart,
    upload_dir: &Path,
    max_file_size: u64,
    upload: &mut Option<UploadedFile>,
    request: &mut ConversionRequest,
) -> Result<(), ApiError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == INPUT_FILE_FIELD {
            // browsers send an empty part when no file was picked
            let original_name = field.file_name().unwrap_or_default().to_string();
            if original_name.is_empty() {
                field.bytes().await?;
                continue;
            }
            if upload.is_some() {
                return Err(ApiError::BadRequest(
                    "Only one input file can be uploaded.".to_string(),
                ));
            }

            *upload = Some(persist_field(field, original_name, upload_dir, max_file_size).await?);
            continue;
        }

        let value = field.text().await?;
        request.insert_field(&name, value);
    }

    Ok(())
}

async fn persist_field(
    mut field: Field<'_>,
    original_name: String,
    upload_dir: &Path,
    max_file_size: u64,
) -> Result<UploadedFile, ApiError> {
    let path = upload_dir.join(Uuid::new_v4().to_string());
    debug!(?path, original_name, "Receiving upload");

    let mut file = tokio::fs::File::create(&path).await?;
    let result = write_chunks(&mut field, &mut file, max_file_size).await;
    drop(file);

    let size = match result {
        Ok(size) => size,
        Err(error) => {
            if matches!(error, ApiError::FileTooLarge(_)) {
                warn!(original_name, max_file_size, "Upload exceeds size limit");
            }
            remove_file_quietly(&path).await;
            return Err(error);
        }
    };

    info!(?path, original_name, size, "Upload stored");
    Ok(UploadedFile {
        path,
        original_name,
        size,
    })
}

async fn write_chunks(
    field: &mut Field<'_>,
    file: &mut tokio::fs::File,
    max_file_size: u64,
) -> Result<u64, ApiError> {
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > max_file_size {
            return Err(ApiError::FileTooLarge(max_file_size));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(size)
}

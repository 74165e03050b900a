use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file uploaded.")]
    NoFile,

    #[error("File exceeds the maximum upload size of {0} bytes.")]
    FileTooLarge(u64),

    #[error("{0}")]
    BadRequest(String),

    #[error("Job not found.")]
    JobNotFound,

    #[error("File not found or not ready.")]
    NotReady,

    #[error("File not found")]
    FileNotFound,

    #[error("Invalid file name.")]
    InvalidFileName,

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("Failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFile | ApiError::BadRequest(_) | ApiError::InvalidFileName => {
                StatusCode::BAD_REQUEST
            }
            ApiError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::JobNotFound | ApiError::NotReady | ApiError::FileNotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::Multipart(error) => error.status(),
            ApiError::Archive(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            ApiError::Multipart(error) => error.body_text(),
            // internals stay in the log
            ApiError::Io(_) | ApiError::Archive(_) => {
                tracing::error!(error = %self, "Request failed");
                "Internal server error.".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

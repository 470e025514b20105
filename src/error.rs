//! Error types.
//!
//! Each concern has its own enum; handlers fold them into [`AppError`], which
//! maps every failure to a status code and a message for the operator. None of
//! these are retried automatically: the operator re-invokes the action.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

/// The uploaded file could not be turned into a usable photo.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Could not read the upload as an image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Could not encode the processed image: {0}")]
    Encode(#[source] image::ImageError),
}

/// The call to the vision model produced no record.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extraction request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Extraction request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Extraction API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Extraction API returned an unexpected body: {0}")]
    UnexpectedBody(String),

    #[error("No JSON object found in the model response")]
    MissingJson,

    #[error("Model response is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// Writing the export artifacts or the durable store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Workbook {path:?} is locked or unreadable; close it and retry ({reason})")]
    WorkbookLocked { path: PathBuf, reason: String },

    #[error("Failed to build workbook: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An action that does not fit the session's current state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} while the session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Missing input: {0}")]
    MissingInput(String),
}

/// Everything a handler can return.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Image(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Extraction(ExtractionError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Extraction(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(StoreError::WorkbookLocked { .. }) => StatusCode::LOCKED,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Session(SessionError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            AppError::Session(SessionError::MissingInput(_)) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}

//! Error types and handling
//!
//! Common error types used across the recorder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture start failed: {0}")]
    CaptureStartFailed(String),

    #[error("Capture stop failed: {0}")]
    CaptureStopFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("GPS unavailable: {0}")]
    GpsUnavailable(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Device scan failed: {0}")]
    DeviceScan(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecorderError {
    /// Stable code used by the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::PermissionDenied(_) => "PERMISSION_DENIED",
            RecorderError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            RecorderError::CaptureStartFailed(_) => "CAPTURE_START_FAILED",
            RecorderError::CaptureStopFailed(_) => "CAPTURE_STOP_FAILED",
            RecorderError::UploadFailed(_) => "UPLOAD_FAILED",
            RecorderError::GpsUnavailable(_) => "GPS_UNAVAILABLE",
            RecorderError::SessionBusy(_) => "SESSION_BUSY",
            RecorderError::InvalidState(_) => "INVALID_STATE",
            RecorderError::DeviceScan(_) => "DEVICE_SCAN_FAILED",
            RecorderError::Config(_) => "CONFIG_ERROR",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Error response for frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

//! Capture trait definitions
//!
//! Platform-agnostic types and traits for the camera driver and the USB bus.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// USB device class code for imaging devices (still/video cameras)
pub const USB_CLASS_IMAGING: u8 = 0x06;

/// Where a capture device is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    BuiltIn,
    Usb,
}

/// A selectable capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Unique within one registry snapshot
    pub id: String,

    /// Human-readable name
    pub display_name: String,

    pub kind: DeviceKind,
}

/// Camera as reported by the built-in camera driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDescriptor {
    pub id: String,
    pub name: String,
}

/// Device as reported by the USB bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDescriptor {
    /// Bus-unique identifier (serial number or port path)
    pub device_id: String,

    /// USB device class code
    pub class_code: u8,

    /// Product string, if the device reports one
    pub product_name: Option<String>,

    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbDescriptor {
    /// Whether the device self-reports as an imaging device
    pub fn is_imaging(&self) -> bool {
        self.class_code == USB_CLASS_IMAGING
    }
}

/// Caps handed to the camera when a capture starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureLimits {
    pub max_duration_seconds: u64,
    pub max_size_bytes: u64,
}

impl CaptureLimits {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds)
    }
}

/// Finished recording produced by the camera at stop time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingArtifact {
    /// Location of the recorded clip
    pub path: PathBuf,

    /// Camera-reported duration in milliseconds
    pub duration_ms: u64,

    pub size_bytes: u64,
}

impl RecordingArtifact {
    pub fn duration_seconds(&self) -> u64 {
        self.duration_ms / 1000
    }
}

/// Errors reported by the camera driver or the USB bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Not recording")]
    NotRecording,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Camera subsystem. The capture pipeline itself is opaque.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Enumerate cameras known to the built-in driver
    async fn list_devices(&self) -> Result<Vec<CameraDescriptor>, CaptureError>;

    /// Begin capturing from `device`; returns once the camera acknowledges
    async fn start_capture(
        &self,
        device: &Device,
        limits: CaptureLimits,
    ) -> Result<(), CaptureError>;

    /// Finish the capture and hand over the artifact
    async fn stop_capture(&self) -> Result<RecordingArtifact, CaptureError>;

    /// Bytes written by the in-progress capture
    fn bytes_recorded(&self) -> u64;
}

/// USB device bus
#[async_trait]
pub trait UsbBus: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<UsbDescriptor>, CaptureError>;
}

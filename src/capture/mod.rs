//! Capture devices
//!
//! Collaborator traits for the camera driver and USB bus, plus the registry
//! that merges them into one selectable device list.

pub mod registry;
pub mod traits;

pub use registry::{DeviceRegistry, RegistryEvent, ScanPolicy, ScanReport, ScanSource};
pub use traits::{
    CameraBackend, CameraDescriptor, CaptureError, CaptureLimits, Device, DeviceKind,
    RecordingArtifact, UsbBus, UsbDescriptor, USB_CLASS_IMAGING,
};

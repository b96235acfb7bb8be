//! Capture device registry
//!
//! Merges the built-in camera driver and the USB bus into one device list and
//! owns the operator's current selection. Every scan replaces the list in full.

use super::traits::{
    CameraBackend, CameraDescriptor, CaptureError, Device, DeviceKind, UsbBus, UsbDescriptor,
};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// What a scan does when one of its two sources fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanPolicy {
    /// Any failing source fails the whole scan; the held list is kept.
    #[default]
    Strict,
    /// A failing source contributes no devices and is reported in the scan report.
    BestEffort,
}

/// Enumeration source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    Camera,
    Usb,
}

impl fmt::Display for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanSource::Camera => write!(f, "camera driver"),
            ScanSource::Usb => write!(f, "USB bus"),
        }
    }
}

/// Result of a successful scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub devices: Vec<Device>,

    /// Previously selected device that disappeared in this scan
    pub selection_lost: Option<Device>,

    /// Sources skipped under [`ScanPolicy::BestEffort`]
    pub degraded_sources: Vec<ScanSource>,
}

/// Events emitted by the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// Device list replaced
    DevicesChanged { count: usize },
    /// Selection changed by the operator
    SelectionChanged(Option<Device>),
    /// Selected device vanished during a rescan; selection cleared
    SelectionLost(Device),
}

#[derive(Default)]
struct RegistrySnapshot {
    devices: Vec<Device>,
    selected: Option<String>,
}

/// Unified list of selectable cameras
pub struct DeviceRegistry {
    camera: Arc<dyn CameraBackend>,
    usb: Arc<dyn UsbBus>,
    policy: ScanPolicy,
    snapshot: RwLock<RegistrySnapshot>,
    scan_lock: Mutex<()>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    pub fn new(camera: Arc<dyn CameraBackend>, usb: Arc<dyn UsbBus>, policy: ScanPolicy) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            camera,
            usb,
            policy,
            snapshot: RwLock::new(RegistrySnapshot::default()),
            scan_lock: Mutex::new(()),
            event_tx,
        }
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Current device list
    pub fn devices(&self) -> Vec<Device> {
        self.snapshot.read().devices.clone()
    }

    /// Currently selected device, if any
    pub fn selected(&self) -> Option<Device> {
        let snapshot = self.snapshot.read();
        let id = snapshot.selected.as_ref()?;
        snapshot.devices.iter().find(|d| &d.id == id).cloned()
    }

    /// Select a device from the current list
    pub fn select(&self, id: &str) -> RecorderResult<Device> {
        let device = {
            let mut snapshot = self.snapshot.write();
            let device = snapshot
                .devices
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| {
                    RecorderError::DeviceUnavailable(format!("no device with id '{id}'"))
                })?;
            snapshot.selected = Some(device.id.clone());
            device
        };

        tracing::info!("Selected device: {} ({})", device.display_name, device.id);
        let _ = self.event_tx.send(RegistryEvent::SelectionChanged(Some(device.clone())));
        Ok(device)
    }

    pub fn clear_selection(&self) {
        let had_selection = self.snapshot.write().selected.take().is_some();
        if had_selection {
            let _ = self.event_tx.send(RegistryEvent::SelectionChanged(None));
        }
    }

    /// Enumerate both sources and replace the device list
    pub async fn scan(&self) -> RecorderResult<ScanReport> {
        let _guard = self.scan_lock.lock().await;

        let (cameras, usb) = tokio::join!(self.camera.list_devices(), self.usb.list_devices());

        let mut degraded_sources = Vec::new();
        let cameras = self.accept_source(ScanSource::Camera, cameras, &mut degraded_sources)?;
        let usb = self.accept_source(ScanSource::Usb, usb, &mut degraded_sources)?;
        if degraded_sources.len() == 2 {
            return Err(RecorderError::DeviceScan(
                "both camera driver and USB bus enumeration failed".to_string(),
            ));
        }

        let devices = merge_devices(cameras, usb);

        let selection_lost = {
            let mut snapshot = self.snapshot.write();
            let lost = match &snapshot.selected {
                Some(id) if !devices.iter().any(|d| &d.id == id) => {
                    snapshot.devices.iter().find(|d| &d.id == id).cloned()
                }
                _ => None,
            };
            if lost.is_some() {
                snapshot.selected = None;
            }
            snapshot.devices = devices.clone();
            lost
        };

        tracing::info!(
            "Device scan found {} device(s){}",
            devices.len(),
            if degraded_sources.is_empty() { "" } else { " (degraded)" }
        );

        let _ = self.event_tx.send(RegistryEvent::DevicesChanged {
            count: devices.len(),
        });
        if let Some(device) = &selection_lost {
            tracing::warn!("Selected device {} is no longer available", device.id);
            let _ = self.event_tx.send(RegistryEvent::SelectionLost(device.clone()));
        }

        Ok(ScanReport {
            devices,
            selection_lost,
            degraded_sources,
        })
    }

    fn accept_source<T>(
        &self,
        source: ScanSource,
        result: Result<Vec<T>, CaptureError>,
        degraded: &mut Vec<ScanSource>,
    ) -> RecorderResult<Vec<T>> {
        match result {
            Ok(items) => Ok(items),
            Err(e) if self.policy == ScanPolicy::BestEffort => {
                tracing::warn!("Skipping {} during scan: {}", source, e);
                degraded.push(source);
                Ok(Vec::new())
            }
            Err(CaptureError::PermissionDenied(msg)) => {
                tracing::error!("{} enumeration denied: {}", source, msg);
                Err(RecorderError::PermissionDenied(msg))
            }
            Err(e) => {
                tracing::error!("{} enumeration failed: {}", source, e);
                Err(RecorderError::DeviceScan(format!("{source}: {e}")))
            }
        }
    }
}

/// Normalize both source lists: built-in cameras first, then imaging-class
/// USB devices, each in native order. Duplicate ids keep the first entry.
pub fn merge_devices(cameras: Vec<CameraDescriptor>, usb: Vec<UsbDescriptor>) -> Vec<Device> {
    let built_in = cameras.into_iter().map(|c| Device {
        id: c.id,
        display_name: c.name,
        kind: DeviceKind::BuiltIn,
    });

    let usb = usb.into_iter().filter(UsbDescriptor::is_imaging).map(|u| Device {
        id: format!("usb-{}", u.device_id),
        display_name: u
            .product_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("USB Camera {}", u.device_id)),
        kind: DeviceKind::Usb,
    });

    let mut seen = HashSet::new();
    built_in
        .chain(usb)
        .filter(|device| {
            let fresh = seen.insert(device.id.clone());
            if !fresh {
                tracing::warn!("Ignoring duplicate device id {}", device.id);
            }
            fresh
        })
        .collect()
}

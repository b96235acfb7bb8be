use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::capture::traits::{
    CameraBackend, CameraDescriptor, CaptureError, CaptureLimits, Device, RecordingArtifact,
    UsbBus, UsbDescriptor,
};
use crate::gps::provider::{PermissionStatus, PositionError, PositionFix, PositionProvider};
use crate::recorder::state::SessionMetadata;
use crate::upload::handoff::{SerializedGpsLog, UploadError, UploadPipeline, UploadReceipt};

struct ActiveCapture {
    device: Device,
    started: Instant,
}

/// Camera that "records" by measuring time. Size grows at a fixed bitrate.
pub struct MockCamera {
    devices: Mutex<Result<Vec<CameraDescriptor>, CaptureError>>,
    next_start_error: Mutex<Option<CaptureError>>,
    next_stop_error: Mutex<Option<CaptureError>>,
    capture: Mutex<Option<ActiveCapture>>,
    last_limits: Mutex<Option<CaptureLimits>>,
    bytes_per_second: AtomicU64,
    output_dir: Option<PathBuf>,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
    clips: AtomicU64,
}

impl MockCamera {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Ok(Vec::new())),
            next_start_error: Mutex::new(None),
            next_stop_error: Mutex::new(None),
            capture: Mutex::new(None),
            last_limits: Mutex::new(None),
            bytes_per_second: AtomicU64::new(1_000_000),
            output_dir: None,
            start_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
            clips: AtomicU64::new(0),
        }
    }

    /// Write a sparse file of the reported size for every finished clip
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn set_devices(&self, devices: Vec<CameraDescriptor>) {
        *self.devices.lock() = Ok(devices);
    }

    pub fn fail_listing_with(&self, error: CaptureError) {
        *self.devices.lock() = Err(error);
    }

    pub fn fail_next_start(&self, error: CaptureError) {
        *self.next_start_error.lock() = Some(error);
    }

    pub fn fail_next_stop(&self, error: CaptureError) {
        *self.next_stop_error.lock() = Some(error);
    }

    pub fn set_bytes_per_second(&self, rate: u64) {
        self.bytes_per_second.store(rate, Ordering::Relaxed);
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }

    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::Relaxed)
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::Relaxed)
    }

    pub fn last_limits(&self) -> Option<CaptureLimits> {
        *self.last_limits.lock()
    }

    fn bytes_since(&self, started: Instant) -> u64 {
        let rate = self.bytes_per_second.load(Ordering::Relaxed) as f64;
        (started.elapsed().as_secs_f64() * rate) as u64
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraBackend for MockCamera {
    async fn list_devices(&self) -> Result<Vec<CameraDescriptor>, CaptureError> {
        self.devices.lock().clone()
    }

    async fn start_capture(
        &self,
        device: &Device,
        limits: CaptureLimits,
    ) -> Result<(), CaptureError> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.next_start_error.lock().take() {
            return Err(error);
        }

        let mut capture = self.capture.lock();
        if capture.is_some() {
            return Err(CaptureError::Backend("camera already capturing".to_string()));
        }
        *capture = Some(ActiveCapture {
            device: device.clone(),
            started: Instant::now(),
        });
        *self.last_limits.lock() = Some(limits);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<RecordingArtifact, CaptureError> {
        self.stop_calls.fetch_add(1, Ordering::Relaxed);
        let capture = self.capture.lock().take();
        if let Some(error) = self.next_stop_error.lock().take() {
            return Err(error);
        }
        let capture = capture.ok_or(CaptureError::NotRecording)?;

        let duration_ms = capture.started.elapsed().as_millis() as u64;
        let size_bytes = self.bytes_since(capture.started);
        let clip = self.clips.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{}-{}.mp4", capture.device.id, clip);

        let path = match &self.output_dir {
            Some(dir) => {
                let path = dir.join(file_name);
                std::fs::File::create(&path)
                    .and_then(|file| file.set_len(size_bytes))
                    .map_err(|e| CaptureError::Backend(e.to_string()))?;
                path
            }
            None => std::env::temp_dir().join(file_name),
        };

        Ok(RecordingArtifact {
            path,
            duration_ms,
            size_bytes,
        })
    }

    fn bytes_recorded(&self) -> u64 {
        match self.capture.lock().as_ref() {
            Some(capture) => self.bytes_since(capture.started),
            None => 0,
        }
    }
}

pub struct MockUsbBus {
    devices: Mutex<Result<Vec<UsbDescriptor>, CaptureError>>,
}

impl MockUsbBus {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Ok(Vec::new())),
        }
    }

    pub fn set_devices(&self, devices: Vec<UsbDescriptor>) {
        *self.devices.lock() = Ok(devices);
    }

    pub fn fail_with(&self, error: CaptureError) {
        *self.devices.lock() = Err(error);
    }
}

impl Default for MockUsbBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsbBus for MockUsbBus {
    async fn list_devices(&self) -> Result<Vec<UsbDescriptor>, CaptureError> {
        self.devices.lock().clone()
    }
}

enum ScriptedFix {
    /// Stamped with the wall clock when polled
    Now {
        latitude: f64,
        longitude: f64,
        accuracy_meters: Option<f64>,
    },
    At(PositionFix),
    Error(PositionError),
}

/// Position provider replaying a queue of fixes, one per poll.
/// An empty queue answers with [`PositionError::Timeout`].
pub struct MockPositionProvider {
    permission: Mutex<PermissionStatus>,
    script: Mutex<VecDeque<ScriptedFix>>,
    polls: AtomicU64,
}

impl MockPositionProvider {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(PermissionStatus::Granted),
            script: Mutex::new(VecDeque::new()),
            polls: AtomicU64::new(0),
        }
    }

    pub fn set_permission(&self, status: PermissionStatus) {
        *self.permission.lock() = status;
    }

    pub fn push_fix(&self, latitude: f64, longitude: f64, accuracy_meters: Option<f64>) {
        self.script.lock().push_back(ScriptedFix::Now {
            latitude,
            longitude,
            accuracy_meters,
        });
    }

    pub fn push_fix_at(&self, fix: PositionFix) {
        self.script.lock().push_back(ScriptedFix::At(fix));
    }

    pub fn push_error(&self, error: PositionError) {
        self.script.lock().push_back(ScriptedFix::Error(error));
    }

    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

impl Default for MockPositionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositionProvider for MockPositionProvider {
    async fn request_permission(&self) -> PermissionStatus {
        *self.permission.lock()
    }

    async fn current_fix(&self) -> Result<PositionFix, PositionError> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        match self.script.lock().pop_front() {
            Some(ScriptedFix::Now {
                latitude,
                longitude,
                accuracy_meters,
            }) => Ok(PositionFix {
                latitude,
                longitude,
                accuracy_meters,
                timestamp: Utc::now(),
            }),
            Some(ScriptedFix::At(fix)) => Ok(fix),
            Some(ScriptedFix::Error(error)) => Err(error),
            None => Err(PositionError::Timeout),
        }
    }
}

/// What the mock uploader received
#[derive(Debug, Clone)]
pub struct Submission {
    pub artifact: RecordingArtifact,
    pub gps_log: SerializedGpsLog,
    pub metadata: SessionMetadata,
}

/// Upload pipeline answering from a queue of results; succeeds when empty
pub struct MockUploadPipeline {
    results: Mutex<VecDeque<Result<UploadReceipt, UploadError>>>,
    submissions: Mutex<Vec<Submission>>,
    delay: Mutex<Option<Duration>>,
}

impl MockUploadPipeline {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn push_result(&self, result: Result<UploadReceipt, UploadError>) {
        self.results.lock().push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }
}

impl Default for MockUploadPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadPipeline for MockUploadPipeline {
    async fn submit(
        &self,
        artifact: &RecordingArtifact,
        gps_log: &SerializedGpsLog,
        metadata: &SessionMetadata,
    ) -> Result<UploadReceipt, UploadError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let attempt = {
            let mut submissions = self.submissions.lock();
            submissions.push(Submission {
                artifact: artifact.clone(),
                gps_log: gps_log.clone(),
                metadata: metadata.clone(),
            });
            submissions.len()
        };

        self.results.lock().pop_front().unwrap_or_else(|| {
            Ok(UploadReceipt {
                remote_id: format!("{}-{}", metadata.session_id, attempt),
            })
        })
    }
}

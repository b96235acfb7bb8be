//! Recording coordinator
//!
//! Owns the session state machine and reconciles the camera, the GPS sampler
//! and the upload handoff into one lifecycle:
//!
//! ```text
//! Idle -> Starting -> Active -> Stopping -> Uploading -> Idle
//!            |                                  |
//!            +-> Idle (camera start failed)     +-> Failed -> Uploading (retry)
//!                                                          -> Idle (dismiss)
//! ```
//!
//! Transitions are serialized by one async mutex. The observable snapshot sits
//! behind a separate lock so queries never wait for a transition to finish.

use super::state::{
    RecordingSession, RetainedUpload, SessionId, SessionMetadata, SessionState, StopReason,
};
use super::ticker::Ticker;
use crate::capture::registry::DeviceRegistry;
use crate::capture::traits::{
    CameraBackend, CaptureError, CaptureLimits, RecordingArtifact, UsbBus,
};
use crate::config::RecorderConfig;
use crate::gps::log::GpsLog;
use crate::gps::provider::PositionProvider;
use crate::gps::sampler::{GpsSampler, GpsStatus, GpsStatusHandle};
use crate::upload::handoff::{UploadHandoff, UploadOutcome, UploadPipeline};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// Session moved to a new state
    StateChanged {
        session_id: Option<SessionId>,
        state: SessionState,
    },
    /// Display tick while Active
    Tick {
        session_id: SessionId,
        elapsed_seconds: u64,
    },
    /// A capture cap tripped; the session is being stopped
    LimitReached {
        session_id: SessionId,
        reason: StopReason,
    },
    /// Terminal outcome of an upload attempt
    UploadFinished {
        session_id: SessionId,
        outcome: UploadOutcome,
    },
    /// A transition failed
    Error {
        session_id: Option<SessionId>,
        message: String,
    },
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// No Active session
    NothingToStop,
    Finished {
        session_id: SessionId,
        reason: StopReason,
        artifact: RecordingArtifact,
        fix_count: usize,
        upload: UploadOutcome,
    },
}

/// External subsystems the coordinator drives
pub struct Collaborators {
    pub camera: Arc<dyn CameraBackend>,
    pub usb: Arc<dyn UsbBus>,
    pub positions: Arc<dyn PositionProvider>,
    pub uploader: Arc<dyn UploadPipeline>,
}

/// State only touched while holding the transition lock
struct Machine {
    gps: GpsSampler,
    ticker: Option<Ticker>,
}

struct Inner {
    registry: Arc<DeviceRegistry>,
    camera: Arc<dyn CameraBackend>,
    handoff: UploadHandoff,
    limits: CaptureLimits,
    tick_interval: Duration,

    session: RwLock<RecordingSession>,
    gps_status: GpsStatusHandle,
    /// Written only under the transition lock
    retained: Mutex<Option<RetainedUpload>>,
    /// GPS log of a session whose camera failed to stop
    orphaned_log: Mutex<Option<GpsLog>>,

    machine: AsyncMutex<Machine>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

/// Manages the single recording session. Cheap to clone.
#[derive(Clone)]
pub struct RecordingCoordinator {
    inner: Arc<Inner>,
}

impl RecordingCoordinator {
    pub fn new(config: &RecorderConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            camera,
            usb,
            positions,
            uploader,
        } = collaborators;

        let registry = Arc::new(DeviceRegistry::new(camera.clone(), usb, config.scan_policy));

        let mut gps = GpsSampler::new(positions, config.gps_sample_interval());
        if let Some(dir) = &config.journal_dir {
            gps = gps.with_journal_dir(dir);
        }
        let gps_status = gps.status_handle();

        let (event_tx, _) = broadcast::channel(100);

        Self {
            inner: Arc::new(Inner {
                registry,
                camera,
                handoff: UploadHandoff::new(uploader, config.upload_timeout()),
                limits: config.capture_limits(),
                tick_interval: config.tick_interval(),
                session: RwLock::new(RecordingSession::default()),
                gps_status,
                retained: Mutex::new(None),
                orphaned_log: Mutex::new(None),
                machine: AsyncMutex::new(Machine { gps, ticker: None }),
                event_tx,
            }),
        }
    }

    /// Device list and selection
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> RecordingSession {
        self.inner.session.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.read().state
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.inner.session.read().elapsed_seconds
    }

    /// Live GPS health
    pub fn gps_status(&self) -> GpsStatus {
        self.inner.gps_status.get()
    }

    /// Finished session whose upload failed, if any
    pub fn retained_upload(&self) -> Option<RetainedUpload> {
        self.inner.retained.lock().clone()
    }

    /// Take the GPS log left behind when the camera failed to stop.
    ///
    /// The log is no longer tied to an artifact, so its journal (if any) is
    /// left on disk for the caller to deal with.
    pub fn take_orphaned_gps_log(&self) -> Option<GpsLog> {
        self.inner.orphaned_log.lock().take()
    }

    /// Start recording from the selected device
    pub async fn start(&self) -> RecorderResult<SessionId> {
        self.ensure_idle()?;
        let device = self
            .inner
            .registry
            .selected()
            .ok_or_else(|| RecorderError::DeviceUnavailable("no camera selected".to_string()))?;

        let mut machine = self.inner.machine.lock().await;
        self.ensure_idle()?;

        let session_id = SessionId::new();
        *self.inner.session.write() = RecordingSession::starting(session_id, device.clone());
        self.emit(RecordingEvent::StateChanged {
            session_id: Some(session_id),
            state: SessionState::Starting,
        });

        tracing::info!(
            "Starting session {} on {} ({})",
            session_id,
            device.display_name,
            device.id
        );

        // GPS first so the log covers the whole recording
        if !machine.gps.start(session_id).await {
            tracing::warn!("Session {} continues without GPS", session_id);
        }

        if let Err(e) = self.inner.camera.start_capture(&device, self.inner.limits).await {
            tracing::error!("Camera start failed for session {}: {}", session_id, e);
            machine.gps.discard().await;

            let error = match e {
                CaptureError::PermissionDenied(msg) => RecorderError::PermissionDenied(msg),
                CaptureError::DeviceNotFound(msg) => RecorderError::DeviceUnavailable(msg),
                other => RecorderError::CaptureStartFailed(other.to_string()),
            };
            self.emit(RecordingEvent::Error {
                session_id: Some(session_id),
                message: error.to_string(),
            });
            self.reset_to_idle();
            return Err(error);
        }

        machine.ticker = Some(self.spawn_ticker(session_id));
        self.transition(session_id, SessionState::Active);

        tracing::info!("Session {} recording", session_id);
        Ok(session_id)
    }

    /// Stop the Active session and hand the recording to the upload pipeline.
    ///
    /// Returns [`StopOutcome::NothingToStop`] when no session is Active.
    pub async fn stop(&self) -> RecorderResult<StopOutcome> {
        let session_id = {
            let session = self.inner.session.read();
            match (session.state, session.session_id) {
                (SessionState::Active, Some(id)) => id,
                _ => return Ok(StopOutcome::NothingToStop),
            }
        };
        self.finish(session_id, StopReason::Manual).await
    }

    /// Resubmit the retained artifact and log of a failed upload
    pub async fn retry_upload(&self) -> RecorderResult<UploadOutcome> {
        let mut machine = self.inner.machine.lock().await;
        let retained = self
            .inner
            .retained
            .lock()
            .take()
            .ok_or_else(|| RecorderError::InvalidState("no failed upload to retry".to_string()))?;

        let session_id = retained.session_id();
        tracing::info!(
            "Retrying upload for session {} (attempt {})",
            session_id,
            retained.attempts + 1
        );
        self.transition(session_id, SessionState::Uploading);

        Ok(self
            .deliver(
                &mut machine,
                retained.artifact,
                retained.gps_log,
                retained.metadata,
                retained.attempts + 1,
            )
            .await)
    }

    /// Give up on a failed upload. The artifact and log are handed back to
    /// the caller and the session returns to Idle.
    pub async fn dismiss_upload(&self) -> RecorderResult<RetainedUpload> {
        let machine = self.inner.machine.lock().await;
        let retained = self
            .inner
            .retained
            .lock()
            .take()
            .ok_or_else(|| RecorderError::InvalidState("no failed upload to dismiss".to_string()))?;

        machine.gps.remove_journal(retained.session_id());
        self.reset_to_idle();

        tracing::info!(
            "Dismissed failed upload for session {}; artifact left at {:?}",
            retained.session_id(),
            retained.artifact.path
        );
        Ok(retained)
    }

    /// Shared stop path for manual stops and tripped caps
    async fn finish(
        &self,
        session_id: SessionId,
        reason: StopReason,
    ) -> RecorderResult<StopOutcome> {
        let mut machine = self.inner.machine.lock().await;

        let (device, started_at) = {
            let session = self.inner.session.read();
            if !session.is_current(session_id) || session.state != SessionState::Active {
                tracing::debug!("Ignoring stop for session {} ({})", session_id, session.state);
                return Ok(StopOutcome::NothingToStop);
            }
            match (session.device.clone(), session.started_at) {
                (Some(device), Some(started_at)) => (device, started_at),
                _ => {
                    return Err(RecorderError::InvalidState(format!(
                        "session {session_id} has no device"
                    )))
                }
            }
        };

        if reason != StopReason::Manual {
            self.emit(RecordingEvent::LimitReached { session_id, reason });
        }

        tracing::info!("Stopping session {} ({:?})", session_id, reason);
        self.transition(session_id, SessionState::Stopping);

        if let Some(ticker) = machine.ticker.take() {
            ticker.stop().await;
        }

        // Camera and GPS are both released whatever the other one does
        let capture = self.inner.camera.stop_capture().await;
        let gps_status = self.inner.gps_status.get();
        let gps_log = machine.gps.stop().await;
        let stopped_at = Utc::now();

        let artifact = match capture {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!("Camera stop failed for session {}: {}", session_id, e);
                match machine.gps.journal_path(session_id) {
                    Some(path) => tracing::warn!(
                        "Keeping {} GPS fixes of session {}; journal left at {:?}",
                        gps_log.len(),
                        session_id,
                        path
                    ),
                    None => tracing::warn!(
                        "Keeping {} GPS fixes of session {}",
                        gps_log.len(),
                        session_id
                    ),
                }
                *self.inner.orphaned_log.lock() = Some(gps_log);

                let error = RecorderError::CaptureStopFailed(e.to_string());
                self.emit(RecordingEvent::Error {
                    session_id: Some(session_id),
                    message: error.to_string(),
                });
                self.reset_to_idle();
                return Err(error);
            }
        };

        tracing::info!(
            "Session {} captured {}ms ({} bytes) with {} GPS fixes",
            session_id,
            artifact.duration_ms,
            artifact.size_bytes,
            gps_log.len()
        );

        let metadata = SessionMetadata {
            session_id,
            device,
            started_at,
            stopped_at,
            stop_reason: reason,
            gps_enabled: gps_log.session_id.is_some(),
            gps_error: gps_status.last_error.map(|e| e.to_string()),
            fix_count: gps_log.len(),
        };
        let fix_count = gps_log.len();

        self.transition(session_id, SessionState::Uploading);
        let upload = self
            .deliver(&mut machine, artifact.clone(), gps_log, metadata, 1)
            .await;

        Ok(StopOutcome::Finished {
            session_id,
            reason,
            artifact,
            fix_count,
            upload,
        })
    }

    /// Hand off to the upload pipeline and settle the session:
    /// Idle on success, Failed with everything retained otherwise.
    async fn deliver(
        &self,
        machine: &mut Machine,
        artifact: RecordingArtifact,
        gps_log: GpsLog,
        metadata: SessionMetadata,
        attempts: u32,
    ) -> UploadOutcome {
        let session_id = metadata.session_id;
        let outcome = self.inner.handoff.submit(&artifact, &gps_log, &metadata).await;

        match &outcome {
            UploadOutcome::Success { .. } => {
                machine.gps.remove_journal(session_id);
                self.reset_to_idle();
            }
            UploadOutcome::Failure { reason } => {
                tracing::warn!(
                    "Upload for session {} failed after {} attempt(s), keeping {:?}",
                    session_id,
                    attempts,
                    artifact.path
                );
                *self.inner.retained.lock() = Some(RetainedUpload {
                    artifact,
                    gps_log,
                    metadata,
                    attempts,
                    last_error: reason.clone(),
                });
                self.transition(session_id, SessionState::Failed);
            }
        }

        self.emit(RecordingEvent::UploadFinished {
            session_id,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn spawn_ticker(&self, session_id: SessionId) -> Ticker {
        let on_tick = {
            let weak = Arc::downgrade(&self.inner);
            move |elapsed_seconds| {
                if let Some(inner) = weak.upgrade() {
                    RecordingCoordinator { inner }.record_tick(session_id, elapsed_seconds);
                }
            }
        };

        let on_limit = {
            let weak = Arc::downgrade(&self.inner);
            move |reason| {
                if let Some(inner) = weak.upgrade() {
                    let coordinator = RecordingCoordinator { inner };
                    tokio::spawn(async move { coordinator.handle_limit(session_id, reason).await });
                }
            }
        };

        Ticker::spawn(
            self.inner.tick_interval,
            self.inner.limits,
            self.inner.camera.clone(),
            on_tick,
            on_limit,
        )
    }

    fn record_tick(&self, session_id: SessionId, elapsed_seconds: u64) {
        {
            let mut session = self.inner.session.write();
            if !session.is_current(session_id) || session.state != SessionState::Active {
                return;
            }
            session.elapsed_seconds = elapsed_seconds;
        }
        self.emit(RecordingEvent::Tick {
            session_id,
            elapsed_seconds,
        });
    }

    async fn handle_limit(&self, session_id: SessionId, reason: StopReason) {
        if let Err(e) = self.finish(session_id, reason).await {
            tracing::error!("Automatic stop of session {} failed: {}", session_id, e);
        }
    }

    fn ensure_idle(&self) -> RecorderResult<()> {
        let state = self.inner.session.read().state;
        if state == SessionState::Idle {
            Ok(())
        } else {
            Err(RecorderError::SessionBusy(format!("session is {state}")))
        }
    }

    fn transition(&self, session_id: SessionId, state: SessionState) {
        {
            let mut session = self.inner.session.write();
            if !session.is_current(session_id) {
                tracing::warn!("Dropping transition to {} for stale session {}", state, session_id);
                return;
            }
            session.state = state;
        }
        tracing::debug!("Session {} -> {}", session_id, state);
        self.emit(RecordingEvent::StateChanged {
            session_id: Some(session_id),
            state,
        });
    }

    fn reset_to_idle(&self) {
        let previous = std::mem::take(&mut *self.inner.session.write());
        tracing::debug!(
            "Session {:?} -> idle (was {})",
            previous.session_id,
            previous.state
        );
        self.emit(RecordingEvent::StateChanged {
            session_id: None,
            state: SessionState::Idle,
        });
    }

    fn emit(&self, event: RecordingEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::UsbDescriptor;
    use crate::gps::provider::{PermissionStatus, PositionError};
    use crate::testing::mocks::{MockCamera, MockPositionProvider, MockUploadPipeline, MockUsbBus};
    use crate::upload::handoff::UploadError;
    use tempfile::tempdir;

    struct Harness {
        camera: Arc<MockCamera>,
        bus: Arc<MockUsbBus>,
        positions: Arc<MockPositionProvider>,
        uploader: Arc<MockUploadPipeline>,
        coordinator: RecordingCoordinator,
    }

    fn build(config: RecorderConfig) -> Harness {
        let camera = Arc::new(MockCamera::new());
        let bus = Arc::new(MockUsbBus::new());
        let positions = Arc::new(MockPositionProvider::new());
        let uploader = Arc::new(MockUploadPipeline::new());
        bus.set_devices(vec![UsbDescriptor {
            device_id: "1".into(),
            class_code: 0x06,
            product_name: Some("Dash Cam".into()),
            vendor_id: 0x1234,
            product_id: 0x0001,
        }]);

        let coordinator = RecordingCoordinator::new(
            &config,
            Collaborators {
                camera: camera.clone(),
                usb: bus.clone(),
                positions: positions.clone(),
                uploader: uploader.clone(),
            },
        );

        Harness {
            camera,
            bus,
            positions,
            uploader,
            coordinator,
        }
    }

    async fn selected(config: RecorderConfig) -> Harness {
        let harness = build(config);
        harness.coordinator.registry().scan().await.unwrap();
        harness.coordinator.registry().select("usb-1").unwrap();
        harness
    }

    fn drain(rx: &mut broadcast::Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_without_selection_is_rejected() {
        let h = build(RecorderConfig::default());
        h.coordinator.registry().scan().await.unwrap();
        let mut events = h.coordinator.subscribe();

        let result = h.coordinator.start().await;
        assert!(matches!(result, Err(RecorderError::DeviceUnavailable(_))));
        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert_eq!(h.camera.start_calls(), 0);
        assert!(!h.coordinator.gps_status().enabled);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_start_when_not_idle_is_rejected() {
        let h = selected(RecorderConfig::default()).await;

        let first = h.coordinator.start().await.unwrap();
        let result = h.coordinator.start().await;

        assert!(matches!(result, Err(RecorderError::SessionBusy(_))));
        assert_eq!(h.camera.start_calls(), 1);
        assert_eq!(h.coordinator.snapshot().session_id, Some(first));
        assert_eq!(h.coordinator.state(), SessionState::Active);

        h.coordinator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_start_failure_rolls_back_gps() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig {
            journal_dir: Some(dir.path().to_path_buf()),
            ..RecorderConfig::default()
        };
        let h = selected(config).await;
        h.camera.fail_next_start(CaptureError::Backend("sensor busy".into()));
        let mut events = h.coordinator.subscribe();

        let result = h.coordinator.start().await;
        assert!(matches!(result, Err(RecorderError::CaptureStartFailed(_))));
        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert_eq!(h.coordinator.snapshot(), RecordingSession::default());

        let status = h.coordinator.gps_status();
        assert!(!status.enabled);
        assert_eq!(status.state, crate::gps::SamplerState::Stopped);

        // No sampling survives the failed session
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.positions.poll_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let events = drain(&mut events);
        let tail = &events[events.len() - 2..];
        assert!(matches!(tail[0], RecordingEvent::Error { .. }));
        assert_eq!(
            tail.last(),
            Some(&RecordingEvent::StateChanged {
                session_id: None,
                state: SessionState::Idle
            })
        );
    }

    #[tokio::test]
    async fn test_camera_permission_denied() {
        let h = selected(RecorderConfig::default()).await;
        h.camera.fail_next_start(CaptureError::PermissionDenied("camera".into()));

        let result = h.coordinator.start().await;
        assert!(matches!(result, Err(RecorderError::PermissionDenied(_))));
        assert_eq!(h.coordinator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let h = selected(RecorderConfig::default()).await;

        let outcome = h.coordinator.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::NothingToStop);
        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert_eq!(h.camera.stop_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_usb_session_with_three_fixes() {
        let h = selected(RecorderConfig::default()).await;
        h.positions.push_fix(52.5200, 13.4050, Some(5.0));
        h.positions.push_fix(52.5201, 13.4051, Some(4.0));
        h.positions.push_fix(52.5202, 13.4052, Some(3.0));
        let mut events = h.coordinator.subscribe();

        let session_id = h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.state(), SessionState::Active);
        let started_at = h.coordinator.snapshot().started_at.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.coordinator.elapsed_seconds(), 3);
        assert_eq!(h.coordinator.gps_status().fix_count, 3);

        let outcome = h.coordinator.stop().await.unwrap();
        let StopOutcome::Finished {
            session_id: finished,
            reason,
            artifact,
            fix_count,
            upload,
        } = outcome
        else {
            panic!("expected a finished session");
        };
        assert_eq!(finished, session_id);
        assert_eq!(reason, StopReason::Manual);
        assert_eq!(artifact.duration_ms, 3500);
        assert_eq!(fix_count, 3);
        assert!(upload.is_success());

        let submissions = h.uploader.submissions();
        assert_eq!(submissions.len(), 1);
        let submission = &submissions[0];
        assert_eq!(submission.artifact, artifact);
        assert_eq!(submission.metadata.session_id, session_id);
        assert_eq!(submission.metadata.device.id, "usb-1");
        assert!(submission.metadata.gps_enabled);

        let entries = crate::gps::log::parse_json_lines(&submission.gps_log.body).entries;
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(entries.iter().all(|e| e.timestamp >= started_at));
        assert!(entries.iter().all(|e| e.timestamp <= submission.metadata.stopped_at));

        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert!(!h.camera.is_capturing());
        assert!(!h.coordinator.gps_status().enabled);

        let states: Vec<SessionState> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                RecordingEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Starting,
                SessionState::Active,
                SessionState::Stopping,
                SessionState::Uploading,
                SessionState::Idle,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_permission_denied_still_records() {
        let h = selected(RecorderConfig::default()).await;
        h.positions.set_permission(PermissionStatus::Denied);

        h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.state(), SessionState::Active);
        let status = h.coordinator.gps_status();
        assert!(!status.enabled);
        assert!(status.has_error);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let outcome = h.coordinator.stop().await.unwrap();
        assert!(matches!(outcome, StopOutcome::Finished { fix_count: 0, .. }));

        let submission = &h.uploader.submissions()[0];
        assert_eq!(submission.gps_log.body, "");
        assert_eq!(submission.gps_log.entry_count, 0);
        assert!(!submission.metadata.gps_enabled);
        assert_eq!(
            submission.metadata.gps_error.as_deref(),
            Some(PositionError::PermissionDenied.to_string().as_str())
        );
        assert_eq!(h.coordinator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_retains_artifact_for_retry() {
        let h = selected(RecorderConfig::default()).await;
        h.positions.push_fix(52.52, 13.40, Some(5.0));
        h.uploader
            .push_result(Err(UploadError::Transport("network down".into())));

        let session_id = h.coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let outcome = h.coordinator.stop().await.unwrap();

        let StopOutcome::Finished { artifact, upload, .. } = outcome else {
            panic!("expected a finished session");
        };
        assert!(!upload.is_success());
        assert_eq!(h.coordinator.state(), SessionState::Failed);
        assert_eq!(h.coordinator.snapshot().session_id, Some(session_id));

        let retained = h.coordinator.retained_upload().unwrap();
        assert_eq!(retained.artifact, artifact);
        assert_eq!(retained.gps_log.session_id, Some(session_id));
        assert_eq!(retained.gps_log.len(), 1);
        assert_eq!(retained.attempts, 1);
        assert_eq!(retained.last_error, "transport error: network down");

        // No new recording while a failed upload is pending
        assert!(matches!(
            h.coordinator.start().await,
            Err(RecorderError::SessionBusy(_))
        ));

        let retry = h.coordinator.retry_upload().await.unwrap();
        assert!(retry.is_success());
        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert!(h.coordinator.retained_upload().is_none());

        let submissions = h.uploader.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].artifact, submissions[1].artifact);
        assert_eq!(submissions[0].gps_log, submissions[1].gps_log);
        assert_eq!(h.camera.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_dismiss_failed_upload() {
        let h = selected(RecorderConfig::default()).await;
        h.uploader.push_result(Err(UploadError::Rejected("quota".into())));

        h.coordinator.start().await.unwrap();
        h.coordinator.stop().await.unwrap();
        assert_eq!(h.coordinator.state(), SessionState::Failed);

        let retained = h.coordinator.dismiss_upload().await.unwrap();
        assert_eq!(retained.last_error, "upload rejected: quota");
        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert!(matches!(
            h.coordinator.dismiss_upload().await,
            Err(RecorderError::InvalidState(_))
        ));
        assert!(matches!(
            h.coordinator.retry_upload().await,
            Err(RecorderError::InvalidState(_))
        ));

        h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.state(), SessionState::Active);
        h.coordinator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_takes_stop_path() {
        let config = RecorderConfig {
            max_duration_seconds: 3,
            ..RecorderConfig::default()
        };
        let h = selected(config).await;
        h.positions.push_fix(52.52, 13.40, Some(5.0));
        h.positions.push_fix(52.53, 13.41, Some(5.0));
        let mut events = h.coordinator.subscribe();

        let session_id = h.coordinator.start().await.unwrap();
        assert_eq!(h.camera.last_limits().unwrap().max_duration_seconds, 3);

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert_eq!(h.camera.stop_calls(), 1);
        assert!(!h.coordinator.gps_status().enabled);

        let submissions = h.uploader.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].metadata.stop_reason, StopReason::MaxDuration);
        assert_eq!(submissions[0].artifact.duration_ms, 3000);
        assert_eq!(submissions[0].gps_log.entry_count, 2);

        let events = drain(&mut events);
        assert!(events.contains(&RecordingEvent::LimitReached {
            session_id,
            reason: StopReason::MaxDuration
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            RecordingEvent::UploadFinished { session_id: id, .. } if *id == session_id
        )));

        // Manual stop afterwards has nothing left to do
        assert_eq!(h.coordinator.stop().await.unwrap(), StopOutcome::NothingToStop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_size_takes_stop_path() {
        let config = RecorderConfig {
            max_size_bytes: 2_500_000,
            ..RecorderConfig::default()
        };
        let h = selected(config).await;
        h.camera.set_bytes_per_second(1_000_000);

        h.coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(h.coordinator.state(), SessionState::Idle);
        let submissions = h.uploader.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].metadata.stop_reason, StopReason::MaxSize);
        assert_eq!(submissions[0].artifact.size_bytes, 3_000_000);
        assert!(h.positions.poll_count() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_stop_does_not_touch_new_session() {
        let h = selected(RecorderConfig::default()).await;

        let first = h.coordinator.start().await.unwrap();
        h.coordinator.stop().await.unwrap();
        let second = h.coordinator.start().await.unwrap();
        assert_ne!(first, second);

        let mut events = h.coordinator.subscribe();
        let outcome = h
            .coordinator
            .finish(first, StopReason::MaxDuration)
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::NothingToStop);
        assert_eq!(h.coordinator.state(), SessionState::Active);
        assert_eq!(h.coordinator.snapshot().session_id, Some(second));
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, RecordingEvent::LimitReached { .. })));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.coordinator.elapsed_seconds(), 1);
        h.coordinator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_stop_failure_still_stops_gps() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig {
            journal_dir: Some(dir.path().to_path_buf()),
            ..RecorderConfig::default()
        };
        let h = selected(config).await;
        h.positions.push_fix(52.52, 13.40, Some(5.0));
        let mut events = h.coordinator.subscribe();

        let session_id = h.coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        h.camera.fail_next_stop(CaptureError::Backend("encoder crashed".into()));

        let result = h.coordinator.stop().await;
        assert!(matches!(result, Err(RecorderError::CaptureStopFailed(_))));
        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert_eq!(h.camera.stop_calls(), 1);
        assert!(!h.coordinator.gps_status().enabled);
        assert!(h.uploader.submissions().is_empty());

        let polls = h.positions.poll_count();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.positions.poll_count(), polls);

        // The GPS log is handed back and its journal kept
        let orphaned = h.coordinator.take_orphaned_gps_log().unwrap();
        assert_eq!(orphaned.session_id, Some(session_id));
        assert_eq!(orphaned.len(), 1);
        assert!(h.coordinator.take_orphaned_gps_log().is_none());
        let journal = crate::gps::log::journal_path(dir.path(), session_id);
        let recovered = crate::gps::log::recover_journal(&journal).unwrap();
        assert_eq!(recovered.entries, orphaned.entries);

        assert_eq!(
            drain(&mut events).last(),
            Some(&RecordingEvent::StateChanged {
                session_id: None,
                state: SessionState::Idle
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_while_upload_in_flight() {
        let h = selected(RecorderConfig::default()).await;
        h.uploader.set_delay(Duration::from_secs(5));

        h.coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let stopping = h.coordinator.clone();
        let stop = tokio::spawn(async move { stopping.stop().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.coordinator.state(), SessionState::Uploading);

        let result = h.coordinator.start().await;
        assert!(matches!(result, Err(RecorderError::SessionBusy(_))));
        assert_eq!(h.camera.start_calls(), 1);
        assert_eq!(h.coordinator.state(), SessionState::Uploading);

        let outcome = stop.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            StopOutcome::Finished { ref upload, .. } if upload.is_success()
        ));
        assert_eq!(h.coordinator.state(), SessionState::Idle);
        assert_eq!(h.uploader.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_selected_device_lost_blocks_start() {
        let h = selected(RecorderConfig::default()).await;
        h.bus.set_devices(vec![]);

        let report = h.coordinator.registry().scan().await.unwrap();
        assert!(report.selection_lost.is_some());
        assert!(matches!(
            h.coordinator.start().await,
            Err(RecorderError::DeviceUnavailable(_))
        ));
    }
}

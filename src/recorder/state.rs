//! Recording state management
//!
//! Defines the session state machine, session identity and the records that
//! travel with a finished recording.

use crate::capture::traits::{Device, RecordingArtifact};
use crate::gps::log::GpsLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Current state of the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording in progress
    #[default]
    Idle,
    /// GPS and camera are being brought up
    Starting,
    /// Currently recording
    Active,
    /// Camera and GPS are being torn down
    Stopping,
    /// Artifact handed to the upload pipeline
    Uploading,
    /// Upload failed; the artifact is retained until retried or dismissed
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Uploading => "uploading",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Observable snapshot of the session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub session_id: Option<SessionId>,

    pub state: SessionState,

    pub device: Option<Device>,

    pub started_at: Option<DateTime<Utc>>,

    /// Display-only tick counter; the artifact duration is authoritative
    pub elapsed_seconds: u64,
}

impl RecordingSession {
    /// Fresh session entering Starting
    pub fn starting(session_id: SessionId, device: Device) -> Self {
        Self {
            session_id: Some(session_id),
            state: SessionState::Starting,
            device: Some(device),
            started_at: Some(Utc::now()),
            elapsed_seconds: 0,
        }
    }

    pub fn is_current(&self, session_id: SessionId) -> bool {
        self.session_id == Some(session_id)
    }
}

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Manual,
    MaxDuration,
    MaxSize,
}

/// Metadata submitted alongside the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: SessionId,
    pub device: Device,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub stop_reason: StopReason,

    /// GPS sampling ran for this session
    pub gps_enabled: bool,

    /// Last GPS error seen, if any
    pub gps_error: Option<String>,

    pub fix_count: usize,
}

/// A finished session whose upload failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetainedUpload {
    pub artifact: RecordingArtifact,
    pub gps_log: GpsLog,
    pub metadata: SessionMetadata,
    pub attempts: u32,
    pub last_error: String,
}

impl RetainedUpload {
    pub fn session_id(&self) -> SessionId {
        self.metadata.session_id
    }
}

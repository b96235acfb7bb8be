//! Upload handoff
//!
//! Serializes the GPS log and submits it with the artifact to the upload
//! pipeline. The pipeline owns retry and backoff; the handoff only reports a
//! terminal outcome. The artifact is never moved or deleted here.

use crate::capture::traits::RecordingArtifact;
use crate::gps::log::GpsLog;
use crate::recorder::state::SessionMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Media type of the serialized GPS log
pub const GPS_LOG_CONTENT_TYPE: &str = "application/x-ndjson";

/// GPS log ready for transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedGpsLog {
    pub content_type: String,
    /// JSON Lines body; empty when no fixes were captured
    pub body: String,
    pub entry_count: usize,
}

impl SerializedGpsLog {
    pub fn from_log(log: &GpsLog) -> Result<Self, serde_json::Error> {
        Ok(Self {
            content_type: GPS_LOG_CONTENT_TYPE.to_string(),
            body: log.to_json_lines()?,
            entry_count: log.len(),
        })
    }
}

/// Acknowledgement from the upload pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub remote_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Upload pipeline collaborator
#[async_trait]
pub trait UploadPipeline: Send + Sync {
    async fn submit(
        &self,
        artifact: &RecordingArtifact,
        gps_log: &SerializedGpsLog,
        metadata: &SessionMetadata,
    ) -> Result<UploadReceipt, UploadError>;
}

/// Terminal result of a handoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum UploadOutcome {
    Success { receipt: UploadReceipt },
    Failure { reason: String },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }
}

pub struct UploadHandoff {
    pipeline: Arc<dyn UploadPipeline>,
    timeout: Duration,
}

impl UploadHandoff {
    pub fn new(pipeline: Arc<dyn UploadPipeline>, timeout: Duration) -> Self {
        Self { pipeline, timeout }
    }

    /// Submit a finished recording and its GPS log
    pub async fn submit(
        &self,
        artifact: &RecordingArtifact,
        gps_log: &GpsLog,
        metadata: &SessionMetadata,
    ) -> UploadOutcome {
        if let Some(log_session) = gps_log.session_id {
            if log_session != metadata.session_id {
                tracing::error!(
                    "Refusing upload: GPS log from session {} paired with session {}",
                    log_session,
                    metadata.session_id
                );
                return UploadOutcome::Failure {
                    reason: format!(
                        "GPS log belongs to session {log_session}, not {}",
                        metadata.session_id
                    ),
                };
            }
        }

        let serialized = match SerializedGpsLog::from_log(gps_log) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::error!("Failed to serialize GPS log: {}", e);
                return UploadOutcome::Failure {
                    reason: format!("GPS log serialization failed: {e}"),
                };
            }
        };

        tracing::info!(
            "Submitting upload for session {}: {:?} ({} bytes, {} fixes)",
            metadata.session_id,
            artifact.path,
            artifact.size_bytes,
            serialized.entry_count
        );

        let submission = self.pipeline.submit(artifact, &serialized, metadata);
        match tokio::time::timeout(self.timeout, submission).await {
            Ok(Ok(receipt)) => {
                tracing::info!(
                    "Upload for session {} accepted as {}",
                    metadata.session_id,
                    receipt.remote_id
                );
                UploadOutcome::Success { receipt }
            }
            Ok(Err(e)) => {
                tracing::error!("Upload for session {} failed: {}", metadata.session_id, e);
                UploadOutcome::Failure {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                tracing::error!(
                    "Upload for session {} timed out after {:?}",
                    metadata.session_id,
                    self.timeout
                );
                UploadOutcome::Failure {
                    reason: format!("upload timed out after {}s", self.timeout.as_secs()),
                }
            }
        }
    }
}

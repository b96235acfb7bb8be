//! Background GPS sampling
//!
//! The sampler polls the position provider on a fixed cadence while a session
//! is recording and appends each accepted fix to an in-memory log. Live status
//! is published through a shared [`GpsStatusHandle`] so the UI can show GPS
//! health without touching the sampler itself.
//!
//! Fixes must be non-decreasing in time. A fix stamped earlier than the last
//! accepted entry, or earlier than the moment sampling started, is dropped and
//! counted; the log is never re-sorted. A fix stamped ahead of the local clock
//! by more than [`MAX_CLOCK_SKEW_MS`] is dropped as well and does not move the
//! ordering floor.

use super::log::{journal_path, GpsJournal, GpsLog, GpsLogEntry};
use super::provider::{PermissionStatus, PositionError, PositionFix, PositionProvider};
use crate::recorder::state::SessionId;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How far ahead of the local clock a fix may be stamped
pub const MAX_CLOCK_SKEW_MS: i64 = 2_000;

/// Sampler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerState {
    #[default]
    Stopped,
    Starting,
    Active,
}

/// Live GPS health
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsStatus {
    pub state: SamplerState,

    /// Sampling is running
    pub enabled: bool,

    /// Last permission request or poll failed
    pub has_error: bool,

    pub last_error: Option<PositionError>,

    /// Accuracy of the most recent accepted fix
    pub accuracy_meters: Option<f64>,

    pub fix_count: usize,

    /// Fixes rejected for being out of order, stale or from the future
    pub dropped_fixes: usize,
}

/// Read-only view of the sampler status, cheap to clone
#[derive(Clone, Default)]
pub struct GpsStatusHandle(Arc<RwLock<GpsStatus>>);

impl GpsStatusHandle {
    pub fn get(&self) -> GpsStatus {
        self.0.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut GpsStatus)) {
        f(&mut self.0.write());
    }
}

struct SamplingTask {
    session_id: SessionId,
    cancel: CancellationToken,
    handle: JoinHandle<Option<GpsJournal>>,
    log: Arc<Mutex<Vec<GpsLogEntry>>>,
}

/// Everything the background loop owns
struct SamplingContext {
    provider: Arc<dyn PositionProvider>,
    period: Duration,
    started_at: DateTime<Utc>,
    log: Arc<Mutex<Vec<GpsLogEntry>>>,
    journal: Option<GpsJournal>,
    status: GpsStatusHandle,
    cancel: CancellationToken,
}

pub struct GpsSampler {
    provider: Arc<dyn PositionProvider>,
    period: Duration,
    journal_dir: Option<PathBuf>,
    status: GpsStatusHandle,
    task: Option<SamplingTask>,
}

impl GpsSampler {
    pub fn new(provider: Arc<dyn PositionProvider>, period: Duration) -> Self {
        Self {
            provider,
            period,
            journal_dir: None,
            status: GpsStatusHandle::default(),
            task: None,
        }
    }

    /// Mirror every accepted fix to `<dir>/<session>.gps.jsonl`
    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    pub fn status(&self) -> GpsStatus {
        self.status.get()
    }

    pub fn status_handle(&self) -> GpsStatusHandle {
        self.status.clone()
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Session currently being sampled
    pub fn session_id(&self) -> Option<SessionId> {
        self.task.as_ref().map(|t| t.session_id)
    }

    /// Begin sampling for `session_id`.
    ///
    /// Returns false when permission is denied or a session is already being
    /// sampled. A denial is recorded in the status, never raised as an error.
    pub async fn start(&mut self, session_id: SessionId) -> bool {
        if let Some(task) = &self.task {
            tracing::warn!(
                "GPS sampler already running for session {}, ignoring start for {}",
                task.session_id,
                session_id
            );
            return false;
        }

        self.status.update(|s| {
            *s = GpsStatus {
                state: SamplerState::Starting,
                ..GpsStatus::default()
            }
        });

        if self.provider.request_permission().await == PermissionStatus::Denied {
            tracing::warn!("Location permission denied, recording without GPS");
            self.status.update(|s| {
                s.state = SamplerState::Stopped;
                s.enabled = false;
                s.has_error = true;
                s.last_error = Some(PositionError::PermissionDenied);
            });
            return false;
        }

        let journal = self.journal_dir.as_ref().and_then(|dir| {
            GpsJournal::create(dir, session_id)
                .map_err(|e| tracing::warn!("Failed to open GPS journal in {:?}: {}", dir, e))
                .ok()
        });

        let log = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let context = SamplingContext {
            provider: self.provider.clone(),
            period: self.period,
            started_at: Utc::now(),
            log: log.clone(),
            journal,
            status: self.status.clone(),
            cancel: cancel.clone(),
        };

        let handle = tokio::spawn(run_sampling_loop(context));

        self.task = Some(SamplingTask {
            session_id,
            cancel,
            handle,
            log,
        });

        self.status.update(|s| {
            s.state = SamplerState::Active;
            s.enabled = true;
        });

        tracing::info!(
            "GPS sampling started for session {} every {:?}",
            session_id,
            self.period
        );
        true
    }

    /// Stop sampling and hand over the frozen log.
    ///
    /// Calling this while stopped returns an empty log. The journal, if any,
    /// is closed and left on disk.
    pub async fn stop(&mut self) -> GpsLog {
        let (log, _journal) = self.halt().await;
        log
    }

    /// Stop sampling and throw the partial log away, journal included
    pub async fn discard(&mut self) {
        let (log, journal) = self.halt().await;
        if let Some(journal) = journal {
            if let Err(e) = journal.discard() {
                tracing::warn!("Failed to remove GPS journal: {}", e);
            }
        }
        tracing::info!("Discarded {} GPS fixes", log.len());
    }

    /// Journal location for `session_id`, when journaling is configured
    pub fn journal_path(&self, session_id: SessionId) -> Option<PathBuf> {
        self.journal_dir
            .as_ref()
            .map(|dir| journal_path(dir, session_id))
    }

    /// Delete the journal of a session whose log has been delivered
    pub fn remove_journal(&self, session_id: SessionId) {
        let Some(path) = self.journal_path(session_id) else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed GPS journal {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove GPS journal {:?}: {}", path, e),
        }
    }

    async fn halt(&mut self) -> (GpsLog, Option<GpsJournal>) {
        let Some(task) = self.task.take() else {
            return (GpsLog::empty(), None);
        };

        task.cancel.cancel();
        let journal = match task.handle.await {
            Ok(journal) => journal,
            Err(e) => {
                tracing::error!("GPS sampling task ended abnormally: {}", e);
                None
            }
        };

        let entries = std::mem::take(&mut *task.log.lock());

        self.status.update(|s| {
            s.state = SamplerState::Stopped;
            s.enabled = false;
        });

        tracing::info!(
            "GPS sampling stopped for session {} with {} fixes",
            task.session_id,
            entries.len()
        );

        (
            GpsLog {
                session_id: Some(task.session_id),
                entries,
            },
            journal,
        )
    }
}

impl Drop for GpsSampler {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
    }
}

async fn run_sampling_loop(mut ctx: SamplingContext) -> Option<GpsJournal> {
    let mut ticker = tokio::time::interval_at(Instant::now() + ctx.period, ctx.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            result = ctx.provider.current_fix() => result,
        };

        match result {
            Ok(fix) => record_fix(&mut ctx, fix),
            Err(e) => {
                tracing::debug!("GPS poll failed: {}", e);
                ctx.status.update(|s| {
                    s.has_error = true;
                    s.last_error = Some(e);
                });
            }
        }
    }

    ctx.journal
}

fn record_fix(ctx: &mut SamplingContext, fix: PositionFix) {
    let entry = GpsLogEntry::from(fix);
    let mut log = ctx.log.lock();

    let ceiling = Utc::now() + chrono::Duration::milliseconds(MAX_CLOCK_SKEW_MS);
    if entry.timestamp > ceiling {
        tracing::debug!(
            "Dropping fix stamped in the future at {} (now {})",
            entry.timestamp,
            Utc::now()
        );
        ctx.status.update(|s| s.dropped_fixes += 1);
        return;
    }

    let floor = log.last().map(|e| e.timestamp).unwrap_or(ctx.started_at);
    if entry.timestamp < floor {
        tracing::debug!(
            "Dropping out-of-order fix at {} (last accepted {})",
            entry.timestamp,
            floor
        );
        ctx.status.update(|s| s.dropped_fixes += 1);
        return;
    }

    if let Some(journal) = ctx.journal.as_mut() {
        if let Err(e) = journal.append(&entry) {
            tracing::warn!("Failed to journal GPS fix: {}", e);
        }
    }

    let accuracy = entry.accuracy_meters;
    log.push(entry);
    let fix_count = log.len();

    ctx.status.update(|s| {
        s.fix_count = fix_count;
        s.accuracy_meters = accuracy;
        s.has_error = false;
        s.last_error = None;
    });
}

//! GPS position logging
//!
//! - PositionProvider trait for the platform location service
//! - GpsSampler background loop that builds the per-session log
//! - JSON Lines log format and on-disk journal

pub mod log;
pub mod provider;
pub mod sampler;

pub use log::{GpsJournal, GpsLog, GpsLogEntry};
pub use provider::{PermissionStatus, PositionError, PositionFix, PositionProvider};
pub use sampler::{GpsSampler, GpsStatus, GpsStatusHandle, SamplerState};

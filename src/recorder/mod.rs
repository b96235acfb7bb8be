//! Recording session
//!
//! - RecordingCoordinator drives the session state machine
//! - Ticker counts elapsed time and enforces capture caps
//! - Session state, metadata and retained uploads

pub mod coordinator;
pub mod state;
mod ticker;

pub use coordinator::{Collaborators, RecordingCoordinator, RecordingEvent, StopOutcome};
pub use state::{
    RecordingSession, RetainedUpload, SessionId, SessionMetadata, SessionState, StopReason,
};

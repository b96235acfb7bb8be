//! GeoCam - camera recordings with a GPS track.
//!
//! This is the library crate for the GeoCam recorder. It coordinates a
//! camera capture with background GPS sampling and hands the finished
//! recording to an upload pipeline.

pub mod capture;
pub mod config;
pub mod gps;
pub mod recorder;
pub mod upload;
pub mod utils;

#[cfg(any(test, feature = "test-source"))]
pub mod testing;

pub use config::RecorderConfig;
pub use recorder::{Collaborators, RecordingCoordinator, RecordingEvent, StopOutcome};
pub use utils::error::{ErrorResponse, RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Safe to call more than once;
/// later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geocam=debug,geocam_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

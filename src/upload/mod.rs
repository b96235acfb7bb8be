//! Upload of finished recordings

pub mod handoff;

pub use handoff::{
    SerializedGpsLog, UploadError, UploadHandoff, UploadOutcome, UploadPipeline, UploadReceipt,
    GPS_LOG_CONTENT_TYPE,
};

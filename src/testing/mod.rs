//! In-process collaborators for tests and the demo binary

pub mod mocks;

pub use mocks::{MockCamera, MockPositionProvider, MockUploadPipeline, MockUsbBus, Submission};

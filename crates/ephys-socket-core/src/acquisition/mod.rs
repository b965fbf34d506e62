//! Acquisition pipeline: geometry, conversion, the engine and its worker,
//! diagnostics, and the host-facing data-thread contract.

pub mod convert;
pub mod diagnostics;
pub mod engine;
pub mod geometry;
pub mod host;

pub use diagnostics::{Diagnostics, DiagnosticsReport, DiagnosticsTimer};
pub use engine::{AcquisitionCore, AcquisitionEngine, ChannelType, EngineState};
pub use geometry::{ChunkBuffers, Geometry, RawChunkBuffer, SampleMatrix};
pub use host::DataThread;

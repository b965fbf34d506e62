//! Ephys Socket Core - Protocol-polymorphic electrophysiology acquisition
//!
//! This library pulls fixed-size chunks of multichannel samples from an
//! external source (a UDP datagram feed or a streaming-data client),
//! converts them to physical units and publishes them into a shared ring
//! buffer for a downstream consumer.

pub mod acquisition;
pub mod adapter;
pub mod buffer;
pub mod config;
pub mod error;
pub mod status;

pub use acquisition::engine::{AcquisitionEngine, ChannelType, EngineState};
pub use acquisition::host::DataThread;
pub use adapter::{ChannelStreamClient, ConnectionState, Protocol, StreamChunk, StreamClient};
pub use buffer::data_buffer::{DataBuffer, Frames};
pub use config::EngineSettings;
pub use error::{AcquisitionError, Result};
pub use status::{StatusEvent, StatusLevel, StatusReporter};

#[cfg(feature = "lsl-support")]
pub use adapter::lsl_client::LslClient;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

//! Ephys Socket - multichannel electrophysiology acquisition
//!
//! This library re-exports the acquisition engine, protocol adapters and
//! destination buffer from `ephys-socket-core`.

pub use ephys_socket_core::acquisition;
pub use ephys_socket_core::adapter;
pub use ephys_socket_core::buffer;
pub use ephys_socket_core::config;
pub use ephys_socket_core::error;
pub use ephys_socket_core::status;

pub use ephys_socket_core::{
    AcquisitionEngine, AcquisitionError, ChannelStreamClient, ChannelType, ConnectionState,
    DataBuffer, DataThread, EngineSettings, EngineState, Frames, Protocol, StatusEvent,
    StatusLevel, StreamChunk, StreamClient,
};
pub use ephys_socket_core::{BUILD_DATE, VERSION};

//! Protocol adapters
//!
//! One adapter per external source kind, each exposing the same small
//! capability set ([`ProtocolAdapter`]). The engine holds exactly one
//! [`Adapter`] at a time and never branches on the protocol itself.
//!
//! - [`socket`]: UDP datagrams of offset-binary u16 samples
//! - [`stream_client`]: a streaming-data client library (e.g. LSL)
//! - [`reserved`]: placeholder for a third backend, never connects

pub mod reserved;
pub mod socket;
pub mod stream_client;

#[cfg(feature = "lsl-support")]
pub mod lsl_client;

use crate::acquisition::geometry::{Geometry, RawChunkBuffer};
use crate::config::EngineSettings;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;

pub use reserved::ReservedAdapter;
pub use socket::SocketAdapter;
pub use stream_client::{ChannelStreamClient, StreamChunk, StreamClient, StreamClientAdapter};

/// External source kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// UDP datagram feed
    SocketFeed,
    /// Streaming-data client feed
    StreamClientFeed,
    /// Reserved third backend
    Reserved,
}

impl Protocol {
    /// Geometry an adapter starts from before any negotiation
    pub fn default_geometry(self) -> Geometry {
        match self {
            Protocol::SocketFeed | Protocol::Reserved => Geometry {
                channel_count: crate::config::DEFAULT_NUM_CHANNELS,
                samples_per_chunk: crate::config::DEFAULT_NUM_SAMPLES,
                sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
                byte_scale: crate::config::DEFAULT_DATA_SCALE,
            },
            Protocol::StreamClientFeed => Geometry {
                channel_count: 8,
                samples_per_chunk: 100,
                sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
                byte_scale: crate::config::DEFAULT_DATA_SCALE,
            },
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::SocketFeed => "socket feed",
            Protocol::StreamClientFeed => "stream client feed",
            Protocol::Reserved => "reserved",
        };
        f.write_str(name)
    }
}

/// Connection state with the external source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Socket bound but no data seen yet
    Bound,
    /// Source is delivering data
    Connected,
}

/// What one successful pull produced
#[derive(Debug)]
pub enum ChunkPayload {
    /// Wire samples were decoded into the raw chunk buffer
    Raw {
        /// Samples per channel
        samples: usize,
    },
    /// Already-decoded rows from a streaming client
    Rows(StreamChunk),
}

impl ChunkPayload {
    /// Samples per channel carried by this payload
    pub fn sample_count(&self) -> usize {
        match self {
            ChunkPayload::Raw { samples } => *samples,
            ChunkPayload::Rows(chunk) => chunk.rows.len(),
        }
    }
}

/// Capability set every protocol backend provides
pub trait ProtocolAdapter {
    /// Protocol this adapter implements
    fn protocol(&self) -> Protocol;

    /// Geometry used before negotiation
    fn default_geometry(&self) -> Geometry {
        self.protocol().default_geometry()
    }

    /// Bytes per wire sample in the raw chunk buffer (0 for row-based sources)
    fn raw_sample_width(&self) -> usize;

    /// Open the connection, tearing down any previous one
    fn connect(&mut self, requested: &Geometry) -> Result<ConnectionState>;

    /// Close the connection
    fn disconnect(&mut self);

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Authoritative geometry for the next session
    fn negotiate(&mut self, requested: &Geometry) -> Result<Geometry>;

    /// Pull exactly one chunk, blocking until data arrives or `cancel` is set
    fn pull_chunk(&mut self, raw: &mut RawChunkBuffer, cancel: &AtomicBool) -> Result<ChunkPayload>;

    /// Local address of the underlying socket, if any
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// The active adapter
pub enum Adapter {
    Socket(SocketAdapter),
    StreamClient(StreamClientAdapter),
    Reserved(ReservedAdapter),
}

impl Adapter {
    /// Build the adapter for `protocol`
    ///
    /// `client` is only consumed by the streaming-client adapter.
    pub fn for_protocol(
        protocol: Protocol,
        settings: &EngineSettings,
        client: Option<Box<dyn StreamClient>>,
    ) -> Self {
        match protocol {
            Protocol::SocketFeed => Adapter::Socket(SocketAdapter::new(
                settings.port,
                std::time::Duration::from_millis(settings.connect_timeout_ms),
                std::time::Duration::from_millis(settings.poll_interval_ms),
            )),
            Protocol::StreamClientFeed => Adapter::StreamClient(StreamClientAdapter::new(
                client,
                settings.samples_per_chunk,
            )),
            Protocol::Reserved => Adapter::Reserved(ReservedAdapter),
        }
    }

    /// Give back the streaming client, if this adapter holds one
    pub fn take_stream_client(&mut self) -> Option<Box<dyn StreamClient>> {
        match self {
            Adapter::StreamClient(adapter) => adapter.take_client(),
            _ => None,
        }
    }

    /// Apply a new UDP port (socket feed only; takes effect on next connect)
    pub fn set_port(&mut self, port: u16) {
        if let Adapter::Socket(adapter) = self {
            adapter.set_port(port);
        }
    }

    /// Apply a new chunk size (streaming-client feed only)
    pub fn set_samples_per_chunk(&mut self, samples: usize) {
        if let Adapter::StreamClient(adapter) = self {
            adapter.set_samples_per_chunk(samples);
        }
    }

    fn inner(&self) -> &dyn ProtocolAdapter {
        match self {
            Adapter::Socket(a) => a,
            Adapter::StreamClient(a) => a,
            Adapter::Reserved(a) => a,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ProtocolAdapter {
        match self {
            Adapter::Socket(a) => a,
            Adapter::StreamClient(a) => a,
            Adapter::Reserved(a) => a,
        }
    }
}

impl ProtocolAdapter for Adapter {
    fn protocol(&self) -> Protocol {
        self.inner().protocol()
    }

    fn default_geometry(&self) -> Geometry {
        self.inner().default_geometry()
    }

    fn raw_sample_width(&self) -> usize {
        self.inner().raw_sample_width()
    }

    fn connect(&mut self, requested: &Geometry) -> Result<ConnectionState> {
        self.inner_mut().connect(requested)
    }

    fn disconnect(&mut self) {
        self.inner_mut().disconnect()
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner().connection_state()
    }

    fn negotiate(&mut self, requested: &Geometry) -> Result<Geometry> {
        self.inner_mut().negotiate(requested)
    }

    fn pull_chunk(
        &mut self,
        raw: &mut RawChunkBuffer,
        cancel: &AtomicBool,
    ) -> Result<ChunkPayload> {
        self.inner_mut().pull_chunk(raw, cancel)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner().local_addr()
    }
}

//! UDP datagram feed
//!
//! Each datagram carries one whole chunk: `channel_count * samples_per_chunk`
//! little-endian u16 samples in offset-binary encoding. A datagram of any
//! other size is rejected and the chunk is dropped.
//!
//! Reads use a short timeout so a pending stop request is noticed within
//! one poll interval instead of waiting for the next datagram.

use super::{ChunkPayload, ConnectionState, Protocol, ProtocolAdapter};
use crate::acquisition::geometry::{Geometry, RawChunkBuffer};
use crate::error::{AcquisitionError, Result};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Bytes per wire sample
const SAMPLE_WIDTH: usize = 2;

/// Largest possible UDP payload, used for the readiness probe
const MAX_DATAGRAM: usize = 65536;

/// UDP socket adapter
pub struct SocketAdapter {
    port: u16,
    connect_timeout: Duration,
    poll_interval: Duration,
    socket: Option<UdpSocket>,
    state: ConnectionState,
}

impl SocketAdapter {
    pub fn new(port: u16, connect_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            port,
            connect_timeout,
            poll_interval,
            socket: None,
            state: ConnectionState::Disconnected,
        }
    }

    /// Configured port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Change the port; the next connect rebinds
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    fn is_timeout(kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
    }
}

impl ProtocolAdapter for SocketAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::SocketFeed
    }

    fn raw_sample_width(&self) -> usize {
        SAMPLE_WIDTH
    }

    fn connect(&mut self, _requested: &Geometry) -> Result<ConnectionState> {
        // Always start from a fresh socket
        self.disconnect();

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port)).map_err(|source| {
            AcquisitionError::BindFailure {
                port: self.port,
                source,
            }
        })?;
        tracing::info!(port = self.port, "Socket bound");
        self.state = ConnectionState::Bound;

        socket.set_read_timeout(Some(self.connect_timeout))?;
        let mut probe = vec![0u8; MAX_DATAGRAM];
        let ready = match socket.peek(&mut probe) {
            Ok(_) => true,
            Err(e) if Self::is_timeout(e.kind()) => false,
            Err(e) => {
                self.socket = Some(socket);
                return Err(e.into());
            }
        };

        socket.set_read_timeout(Some(self.poll_interval))?;
        self.socket = Some(socket);

        if ready {
            self.state = ConnectionState::Connected;
            tracing::info!(port = self.port, "Socket connected");
            Ok(self.state)
        } else {
            tracing::warn!(port = self.port, "Socket failed to connect");
            Err(AcquisitionError::ConnectTimeout {
                port: self.port,
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })
        }
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!(port = self.port, "Socket closed");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn negotiate(&mut self, requested: &Geometry) -> Result<Geometry> {
        // Geometry is operator-configured for this feed
        Ok(*requested)
    }

    fn pull_chunk(
        &mut self,
        raw: &mut RawChunkBuffer,
        cancel: &AtomicBool,
    ) -> Result<ChunkPayload> {
        let socket = self.socket.as_ref().ok_or(AcquisitionError::NotConnected)?;
        let expected = raw.expected_bytes();

        let received = loop {
            if cancel.load(Ordering::Acquire) {
                return Err(AcquisitionError::Cancelled);
            }
            match socket.recv(&mut raw.bytes) {
                Ok(n) => break n,
                Err(e) if Self::is_timeout(e.kind()) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if received != expected {
            return Err(AcquisitionError::ShapeMismatch {
                expected,
                actual: received,
            });
        }

        for (dst, bytes) in raw
            .samples
            .as_mut_slice()
            .iter_mut()
            .zip(raw.bytes.chunks_exact(SAMPLE_WIDTH))
        {
            *dst = u16::from_le_bytes([bytes[0], bytes[1]]);
        }

        Ok(ChunkPayload::Raw {
            samples: raw.samples.cols(),
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

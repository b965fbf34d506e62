//! Streaming-data client feed
//!
//! Wraps an external streaming library behind [`StreamClient`]. The
//! handshake is authoritative for channel count and sample rate; pulled
//! chunks arrive as decoded rows (`rows[sample][channel]`) with one
//! timestamp per sample and are always published sample-major.

use super::{ChunkPayload, ConnectionState, Protocol, ProtocolAdapter};
use crate::acquisition::geometry::{Geometry, RawChunkBuffer};
use crate::error::{AcquisitionError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One chunk pulled from a streaming client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Sample rows, each `channel_count` wide
    pub rows: Vec<Vec<f32>>,
    /// One timestamp per row
    pub timestamps: Vec<f64>,
}

/// Contract of the external streaming-data client library
pub trait StreamClient: Send {
    /// Discover and connect to a stream
    ///
    /// On success, writes the stream's authoritative sample rate and channel
    /// count through the out-parameters and returns true.
    fn connect_to_stream(
        &mut self,
        sample_rate: &mut f64,
        channel_count: &mut usize,
        samples_per_chunk: usize,
    ) -> bool;

    /// Pull the next chunk, blocking until data is available
    ///
    /// Clients should return [`AcquisitionError::Cancelled`] once `cancel`
    /// is set; clients that cannot be interrupted may keep blocking.
    fn pull_data(&mut self, cancel: &AtomicBool) -> Result<StreamChunk>;
}

/// Adapter over a [`StreamClient`]
pub struct StreamClientAdapter {
    client: Option<Box<dyn StreamClient>>,
    samples_per_chunk: usize,
    negotiated: Option<(f64, usize)>,
    state: ConnectionState,
}

impl StreamClientAdapter {
    pub fn new(client: Option<Box<dyn StreamClient>>, samples_per_chunk: usize) -> Self {
        Self {
            client,
            samples_per_chunk,
            negotiated: None,
            state: ConnectionState::Disconnected,
        }
    }

    /// Remove the client, leaving the adapter disconnected
    pub fn take_client(&mut self) -> Option<Box<dyn StreamClient>> {
        self.disconnect();
        self.client.take()
    }

    /// Change the chunk size
    ///
    /// The client sized its pull buffers during the handshake, so a new size
    /// drops the cached handshake and the next negotiation reconnects.
    pub fn set_samples_per_chunk(&mut self, samples: usize) {
        if samples != self.samples_per_chunk {
            self.samples_per_chunk = samples;
            self.negotiated = None;
        }
    }

    /// Sample rate and channel count from the last successful handshake
    pub fn negotiated(&self) -> Option<(f64, usize)> {
        self.negotiated
    }

    fn check_shape(&self, chunk: &StreamChunk, channel_count: usize) -> Result<()> {
        if chunk.rows.len() > self.samples_per_chunk {
            return Err(AcquisitionError::ShapeMismatch {
                expected: self.samples_per_chunk,
                actual: chunk.rows.len(),
            });
        }
        if let Some(row) = chunk.rows.iter().find(|r| r.len() != channel_count) {
            return Err(AcquisitionError::ShapeMismatch {
                expected: channel_count,
                actual: row.len(),
            });
        }
        if chunk.timestamps.len() < chunk.rows.len() {
            return Err(AcquisitionError::ShapeMismatch {
                expected: chunk.rows.len(),
                actual: chunk.timestamps.len(),
            });
        }
        Ok(())
    }
}

impl ProtocolAdapter for StreamClientAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::StreamClientFeed
    }

    fn raw_sample_width(&self) -> usize {
        0
    }

    fn connect(&mut self, requested: &Geometry) -> Result<ConnectionState> {
        self.disconnect();
        let client = self.client.as_mut().ok_or_else(|| {
            AcquisitionError::NegotiationFailure("no streaming client configured".to_string())
        })?;

        let mut sample_rate = requested.sample_rate;
        let mut channel_count = requested.channel_count;
        let ok =
            client.connect_to_stream(&mut sample_rate, &mut channel_count, self.samples_per_chunk);

        if !ok || channel_count == 0 || !(sample_rate > 0.0) {
            return Err(AcquisitionError::NegotiationFailure(format!(
                "handshake returned {} channels at {} Hz",
                channel_count, sample_rate
            )));
        }

        tracing::info!(channel_count, sample_rate, "Stream client connected");
        self.negotiated = Some((sample_rate, channel_count));
        self.state = ConnectionState::Connected;
        Ok(self.state)
    }

    fn disconnect(&mut self) {
        self.negotiated = None;
        self.state = ConnectionState::Disconnected;
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn negotiate(&mut self, requested: &Geometry) -> Result<Geometry> {
        if self.negotiated.is_none() {
            self.connect(requested)?;
        }
        let (sample_rate, channel_count) = self
            .negotiated
            .ok_or_else(|| AcquisitionError::NegotiationFailure("no handshake".to_string()))?;
        Ok(Geometry {
            channel_count,
            sample_rate,
            samples_per_chunk: self.samples_per_chunk,
            byte_scale: requested.byte_scale,
        })
    }

    fn pull_chunk(
        &mut self,
        _raw: &mut RawChunkBuffer,
        cancel: &AtomicBool,
    ) -> Result<ChunkPayload> {
        let (_, channel_count) = self.negotiated.ok_or(AcquisitionError::NotConnected)?;
        let client = self.client.as_mut().ok_or(AcquisitionError::NotConnected)?;
        let chunk = client.pull_data(cancel)?;
        self.check_shape(&chunk, channel_count)?;
        Ok(ChunkPayload::Rows(chunk))
    }
}

/// Stream client fed through a channel
///
/// Bridges any producer (another library's callback, a replay task, a test)
/// into the engine. The handshake advertises a fixed rate and channel count.
pub struct ChannelStreamClient {
    rx: crossbeam_channel::Receiver<StreamChunk>,
    sample_rate: f64,
    channel_count: usize,
    poll_interval: Duration,
}

impl ChannelStreamClient {
    /// Create a client and the sender that feeds it
    pub fn new(
        sample_rate: f64,
        channel_count: usize,
    ) -> (crossbeam_channel::Sender<StreamChunk>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(64);
        (
            tx,
            Self {
                rx,
                sample_rate,
                channel_count,
                poll_interval: Duration::from_millis(20),
            },
        )
    }
}

impl StreamClient for ChannelStreamClient {
    fn connect_to_stream(
        &mut self,
        sample_rate: &mut f64,
        channel_count: &mut usize,
        _samples_per_chunk: usize,
    ) -> bool {
        *sample_rate = self.sample_rate;
        *channel_count = self.channel_count;
        self.channel_count > 0 && self.sample_rate > 0.0
    }

    fn pull_data(&mut self, cancel: &AtomicBool) -> Result<StreamChunk> {
        loop {
            if cancel.load(Ordering::Acquire) {
                return Err(AcquisitionError::Cancelled);
            }
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(chunk) => return Ok(chunk),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(AcquisitionError::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "stream producer disconnected",
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requested() -> Geometry {
        Geometry {
            channel_count: 8,
            samples_per_chunk: 4,
            sample_rate: 30000.0,
            byte_scale: 0.195,
        }
    }

    fn connected_adapter(
        channels: usize,
    ) -> (crossbeam_channel::Sender<StreamChunk>, StreamClientAdapter) {
        let (tx, client) = ChannelStreamClient::new(500.0, channels);
        let mut adapter = StreamClientAdapter::new(Some(Box::new(client)), 4);
        adapter.connect(&requested()).unwrap();
        (tx, adapter)
    }

    #[test]
    fn test_handshake_overrides_geometry() {
        let (_tx, mut adapter) = connected_adapter(3);
        assert_eq!(adapter.connection_state(), ConnectionState::Connected);
        let g = adapter.negotiate(&requested()).unwrap();
        assert_eq!(g.channel_count, 3);
        assert_eq!(g.sample_rate, 500.0);
        assert_eq!(g.samples_per_chunk, 4);
        assert_eq!(g.byte_scale, 0.195);
    }

    #[test]
    fn test_missing_client_fails_negotiation() {
        let mut adapter = StreamClientAdapter::new(None, 4);
        let err = adapter.connect(&requested()).unwrap_err();
        assert!(matches!(err, AcquisitionError::NegotiationFailure(_)));
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_zero_channel_handshake_fails() {
        let (_tx, client) = ChannelStreamClient::new(500.0, 0);
        let mut adapter = StreamClientAdapter::new(Some(Box::new(client)), 4);
        assert!(adapter.connect(&requested()).is_err());
    }

    #[test]
    fn test_pull_returns_rows() {
        let (tx, mut adapter) = connected_adapter(2);
        tx.send(StreamChunk {
            rows: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            timestamps: vec![10.0, 10.002],
        })
        .unwrap();
        let payload = adapter
            .pull_chunk(&mut RawChunkBuffer::default(), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(payload.sample_count(), 2);
    }

    #[test]
    fn test_wrong_width_row_rejected() {
        let (tx, mut adapter) = connected_adapter(2);
        tx.send(StreamChunk {
            rows: vec![vec![1.0, 2.0, 3.0]],
            timestamps: vec![0.0],
        })
        .unwrap();
        let err = adapter
            .pull_chunk(&mut RawChunkBuffer::default(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::ShapeMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_too_many_rows_rejected() {
        let (tx, mut adapter) = connected_adapter(1);
        tx.send(StreamChunk {
            rows: vec![vec![0.0]; 5],
            timestamps: vec![0.0; 5],
        })
        .unwrap();
        let err = adapter
            .pull_chunk(&mut RawChunkBuffer::default(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_timestamps_rejected() {
        let (tx, mut adapter) = connected_adapter(1);
        tx.send(StreamChunk {
            rows: vec![vec![0.0]; 2],
            timestamps: vec![0.0],
        })
        .unwrap();
        assert!(adapter
            .pull_chunk(&mut RawChunkBuffer::default(), &AtomicBool::new(false))
            .is_err());
    }

    #[test]
    fn test_cancel_and_disconnect() {
        let (tx, mut adapter) = connected_adapter(1);
        let err = adapter
            .pull_chunk(&mut RawChunkBuffer::default(), &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Cancelled));

        drop(tx);
        let err = adapter
            .pull_chunk(&mut RawChunkBuffer::default(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Io(_)));
    }

    #[test]
    fn test_chunk_size_change_renegotiates() {
        let (_tx, mut adapter) = connected_adapter(2);
        adapter.set_samples_per_chunk(4);
        assert!(adapter.negotiated().is_some(), "same size keeps the handshake");

        adapter.set_samples_per_chunk(2);
        assert!(adapter.negotiated().is_none());
        let g = adapter.negotiate(&requested()).unwrap();
        assert_eq!(g.samples_per_chunk, 2);
        assert_eq!(g.channel_count, 2);
        assert!(adapter.negotiated().is_some());
    }

    #[test]
    fn test_pull_before_connect_is_not_connected() {
        let (_tx, client) = ChannelStreamClient::new(500.0, 2);
        let mut adapter = StreamClientAdapter::new(Some(Box::new(client)), 4);
        let err = adapter
            .pull_chunk(&mut RawChunkBuffer::default(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::NotConnected));
    }
}

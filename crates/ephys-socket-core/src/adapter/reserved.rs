//! Reserved third backend
//!
//! Holds the protocol slot for a planned remote-data-access style feed.
//! It never connects and never produces data.

use super::{ChunkPayload, ConnectionState, Protocol, ProtocolAdapter};
use crate::acquisition::geometry::{Geometry, RawChunkBuffer};
use crate::error::{AcquisitionError, Result};
use std::sync::atomic::AtomicBool;

/// Adapter that reports every operation as unsupported
#[derive(Debug, Default)]
pub struct ReservedAdapter;

impl ProtocolAdapter for ReservedAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Reserved
    }

    fn raw_sample_width(&self) -> usize {
        0
    }

    fn connect(&mut self, _requested: &Geometry) -> Result<ConnectionState> {
        Err(AcquisitionError::Unsupported(Protocol::Reserved))
    }

    fn disconnect(&mut self) {}

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }

    fn negotiate(&mut self, _requested: &Geometry) -> Result<Geometry> {
        Err(AcquisitionError::Unsupported(Protocol::Reserved))
    }

    fn pull_chunk(
        &mut self,
        _raw: &mut RawChunkBuffer,
        _cancel: &AtomicBool,
    ) -> Result<ChunkPayload> {
        Err(AcquisitionError::Unsupported(Protocol::Reserved))
    }
}

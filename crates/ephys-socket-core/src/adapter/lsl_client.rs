//! Lab Streaming Layer client
//!
//! Resolves an LSL stream by type (and optionally name), opens an inlet and
//! pulls f32 chunks with LSL-synchronized timestamps.

use super::stream_client::{StreamChunk, StreamClient};
use crate::error::{AcquisitionError, Result};
use lsl::{StreamInfo, StreamInlet};
use std::sync::atomic::{AtomicBool, Ordering};

/// [`StreamClient`] backed by liblsl
pub struct LslClient {
    stream_type: String,
    stream_name: Option<String>,
    resolve_timeout: f64,
    inlet: Option<StreamInlet>,
    channel_count: usize,
    sample_buffer: Vec<f32>,
    timestamp_buffer: Vec<f64>,
}

impl LslClient {
    /// Client for the first stream of `stream_type` (e.g. "EEG")
    pub fn new(stream_type: impl Into<String>, stream_name: Option<String>) -> Self {
        Self {
            stream_type: stream_type.into(),
            stream_name,
            resolve_timeout: 5.0,
            inlet: None,
            channel_count: 0,
            sample_buffer: Vec::new(),
            timestamp_buffer: Vec::new(),
        }
    }

    fn resolve(&self) -> Option<StreamInfo> {
        let mut predicate = format!("type='{}'", self.stream_type);
        if let Some(ref name) = self.stream_name {
            predicate.push_str(&format!(" and name='{}'", name));
        }
        tracing::info!(%predicate, "Resolving LSL stream");
        lsl::resolve_bypred(&predicate, 1, self.resolve_timeout)
            .into_iter()
            .next()
    }
}

impl StreamClient for LslClient {
    fn connect_to_stream(
        &mut self,
        sample_rate: &mut f64,
        channel_count: &mut usize,
        samples_per_chunk: usize,
    ) -> bool {
        let Some(info) = self.resolve() else {
            tracing::warn!(stream_type = %self.stream_type, "No LSL stream found");
            return false;
        };

        let channels = info.channel_count() as usize;
        let rate = info.sampling_rate();
        match StreamInlet::new(&info, 360, samples_per_chunk as i32, true) {
            Ok(inlet) => {
                self.inlet = Some(inlet);
                self.channel_count = channels;
                self.sample_buffer = vec![0.0; channels * samples_per_chunk];
                self.timestamp_buffer = vec![0.0; samples_per_chunk];
                *sample_rate = rate;
                *channel_count = channels;
                true
            }
            Err(e) => {
                tracing::warn!(error = ?e, "Failed to create LSL inlet");
                false
            }
        }
    }

    fn pull_data(&mut self, cancel: &AtomicBool) -> Result<StreamChunk> {
        let inlet = self.inlet.as_mut().ok_or(AcquisitionError::NotConnected)?;
        loop {
            if cancel.load(Ordering::Acquire) {
                return Err(AcquisitionError::Cancelled);
            }
            let pulled = inlet
                .pull_chunk_f32(&mut self.sample_buffer, Some(&mut self.timestamp_buffer))
                .map_err(|e| {
                    AcquisitionError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("LSL pull error: {:?}", e),
                    ))
                })?;
            if pulled == 0 {
                std::thread::sleep(std::time::Duration::from_millis(1));
                continue;
            }

            let rows = self.sample_buffer[..pulled * self.channel_count]
                .chunks_exact(self.channel_count)
                .map(|row| row.to_vec())
                .collect();
            return Ok(StreamChunk {
                rows,
                timestamps: self.timestamp_buffer[..pulled].to_vec(),
            });
        }
    }
}

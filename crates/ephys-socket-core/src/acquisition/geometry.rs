//! Chunk geometry and the scratch buffers it governs
//!
//! [`ChunkBuffers::apply_resize`] is the single place where acquisition
//! buffers change size. The engine calls it on start, after negotiation,
//! and never while the worker is running.

use crate::buffer::data_buffer::DataBuffer;
use crate::error::{AcquisitionError, Result};

/// Shape and calibration of one chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Number of channels
    pub channel_count: usize,
    /// Samples per channel in one chunk
    pub samples_per_chunk: usize,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Volts per LSB
    pub byte_scale: f32,
}

impl Geometry {
    /// Number of values in one chunk (`channel_count * samples_per_chunk`)
    pub fn chunk_len(&self) -> usize {
        self.channel_count * self.samples_per_chunk
    }

    /// Check that the geometry describes a non-empty, finite chunk
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 {
            return Err(AcquisitionError::InvalidGeometry(
                "channel_count must be positive".to_string(),
            ));
        }
        if self.samples_per_chunk == 0 {
            return Err(AcquisitionError::InvalidGeometry(
                "samples_per_chunk must be positive".to_string(),
            ));
        }
        if self.channel_count.checked_mul(self.samples_per_chunk).is_none() {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "{} x {} overflows",
                self.channel_count, self.samples_per_chunk
            )));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !self.byte_scale.is_finite() || self.byte_scale == 0.0 {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "byte_scale must be finite and non-zero, got {}",
                self.byte_scale
            )));
        }
        Ok(())
    }
}

/// Owned row-major matrix reused across pulls
///
/// Storage is only touched by [`SampleMatrix::resize`]; pulls write into the
/// existing allocation.
#[derive(Debug, Clone, Default)]
pub struct SampleMatrix<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T: Copy + Default> SampleMatrix<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
            cols: 0,
        }
    }

    /// Resize to `rows x cols`, zero-filling the contents
    pub fn resize(&mut self, rows: usize, cols: usize) -> Result<()> {
        let len = rows
            .checked_mul(cols)
            .ok_or(AcquisitionError::Allocation { requested: usize::MAX })?;
        self.data.clear();
        self.data
            .try_reserve_exact(len)
            .map_err(|_| AcquisitionError::Allocation { requested: len })?;
        self.data.resize(len, T::default());
        self.rows = rows;
        self.cols = cols;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// One row of the matrix
    pub fn row(&self, index: usize) -> &[T] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }
}

/// Wire-level scratch storage filled by an adapter's pull
#[derive(Debug, Default)]
pub struct RawChunkBuffer {
    /// Receive buffer, one byte longer than a full chunk so oversized
    /// datagrams are detectable
    pub bytes: Vec<u8>,
    /// Decoded wire samples, `channel_count x samples_per_chunk`
    pub samples: SampleMatrix<u16>,
    /// Bytes per wire sample (0 when the adapter delivers decoded rows)
    pub sample_width: usize,
}

impl RawChunkBuffer {
    /// Expected datagram size in bytes
    pub fn expected_bytes(&self) -> usize {
        self.samples.len() * self.sample_width
    }
}

/// All per-chunk buffers owned by the acquisition worker
#[derive(Debug, Default)]
pub struct ChunkBuffers {
    /// Raw wire samples
    pub raw: RawChunkBuffer,
    /// Converted samples, sample-major after conversion
    pub converted: SampleMatrix<f32>,
    /// One timestamp per sample in the chunk
    pub timestamps: Vec<f64>,
    /// One event-marker word per sample in the chunk
    pub event_words: Vec<u64>,
}

impl ChunkBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize every buffer for `geometry` and reshape the destination buffer
    ///
    /// `raw_sample_width` is the adapter's bytes per wire sample. The
    /// destination is resized to `(channel_count, capacity)`, which drops
    /// anything it still holds.
    pub fn apply_resize(
        &mut self,
        geometry: &Geometry,
        raw_sample_width: usize,
        destination: &DataBuffer,
        capacity: usize,
    ) -> Result<()> {
        geometry.validate()?;
        let channels = geometry.channel_count;
        let samples = geometry.samples_per_chunk;

        if raw_sample_width > 0 {
            self.raw.samples.resize(channels, samples)?;
            let bytes = geometry.chunk_len() * raw_sample_width + 1;
            self.raw.bytes.clear();
            self.raw
                .bytes
                .try_reserve_exact(bytes)
                .map_err(|_| AcquisitionError::Allocation { requested: bytes })?;
            self.raw.bytes.resize(bytes, 0);
        } else {
            self.raw.samples.resize(0, 0)?;
            self.raw.bytes = Vec::new();
        }
        self.raw.sample_width = raw_sample_width;

        self.converted.resize(samples, channels)?;
        self.timestamps.clear();
        self.timestamps.resize(samples, 0.0);
        self.event_words.clear();
        self.event_words.resize(samples, 0);

        destination.resize(channels, capacity);

        tracing::debug!(
            channels,
            samples,
            raw_sample_width,
            capacity,
            "Resized acquisition buffers"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(channels: usize, samples: usize) -> Geometry {
        Geometry {
            channel_count: channels,
            samples_per_chunk: samples,
            sample_rate: 30000.0,
            byte_scale: 0.195,
        }
    }

    #[test]
    fn test_chunk_len() {
        assert_eq!(geometry(8, 100).chunk_len(), 800);
    }

    #[test]
    fn test_validate_rejects_degenerate() {
        assert!(geometry(0, 10).validate().is_err());
        assert!(geometry(10, 0).validate().is_err());
        assert!(Geometry {
            sample_rate: 0.0,
            ..geometry(1, 1)
        }
        .validate()
        .is_err());
        assert!(Geometry {
            byte_scale: f32::NAN,
            ..geometry(1, 1)
        }
        .validate()
        .is_err());
        assert!(geometry(1, 1).validate().is_ok());
    }

    #[test]
    fn test_sample_matrix_resize_and_rows() {
        let mut m = SampleMatrix::<u16>::new();
        assert!(m.is_empty());
        m.resize(2, 3).unwrap();
        m.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(m.row(1), &[4, 5, 6]);

        m.resize(1, 2).unwrap();
        assert_eq!(m.as_slice(), &[0, 0]);
        assert_eq!((m.rows(), m.cols()), (1, 2));
    }

    #[test]
    fn test_sample_matrix_overflow_is_allocation_error() {
        let mut m = SampleMatrix::<f32>::new();
        let err = m.resize(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, AcquisitionError::Allocation { .. }));
    }

    #[test]
    fn test_apply_resize_socket_grid() {
        let destination = DataBuffer::new(1, 16);
        let mut buffers = ChunkBuffers::new();
        for &channels in &[1usize, 8, 64] {
            for &samples in &[1usize, 100, 10000] {
                let g = geometry(channels, samples);
                buffers.apply_resize(&g, 2, &destination, 10000).unwrap();
                assert_eq!(buffers.raw.samples.len(), channels * samples);
                assert_eq!(buffers.raw.expected_bytes(), channels * samples * 2);
                assert_eq!(buffers.raw.bytes.len(), channels * samples * 2 + 1);
                assert_eq!(buffers.converted.len(), channels * samples);
                assert_eq!(buffers.timestamps.len(), samples);
                assert_eq!(buffers.event_words.len(), samples);
                assert_eq!(destination.channel_count(), channels);
                assert_eq!(destination.capacity(), 10000);
            }
        }
    }

    #[test]
    fn test_apply_resize_row_adapter_has_no_raw_storage() {
        let destination = DataBuffer::new(1, 16);
        let mut buffers = ChunkBuffers::new();
        buffers
            .apply_resize(&geometry(8, 100), 0, &destination, 10000)
            .unwrap();
        assert!(buffers.raw.bytes.is_empty());
        assert_eq!(buffers.raw.expected_bytes(), 0);
        assert_eq!(buffers.converted.len(), 800);
        // Timestamps follow samples_per_chunk for every protocol
        assert_eq!(buffers.timestamps.len(), 100);
    }

    #[test]
    fn test_apply_resize_rejects_invalid_geometry() {
        let destination = DataBuffer::new(1, 16);
        let mut buffers = ChunkBuffers::new();
        assert!(buffers
            .apply_resize(&geometry(0, 100), 2, &destination, 10000)
            .is_err());
        // Destination untouched
        assert_eq!(destination.capacity(), 16);
    }
}

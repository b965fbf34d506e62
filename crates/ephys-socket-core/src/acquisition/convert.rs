//! Raw wire sample to voltage conversion
//!
//! Socket feed samples arrive as offset-binary unsigned 16-bit integers
//! (0x8000 is zero volts). Streaming-client samples arrive already centered
//! as floats, one row per sample. Both are scaled by the geometry's
//! volts-per-LSB factor and written sample-major into the converted buffer,
//! which is the layout the destination buffer expects.

use crate::acquisition::geometry::Geometry;

/// Offset of the unsigned 16-bit wire encoding
pub const RAW_OFFSET: f32 = 32768.0;

/// Convert one offset-binary wire sample to a calibrated value
#[inline]
pub fn raw_to_voltage(raw: u16, scale: f32) -> f32 {
    scale * (f32::from(raw) - RAW_OFFSET)
}

/// Inverse of [`raw_to_voltage`], rounding to the nearest LSB
///
/// Values outside the representable range are clamped.
#[inline]
pub fn voltage_to_raw(value: f32, scale: f32) -> u16 {
    ((value / scale).round() + RAW_OFFSET).clamp(0.0, 65535.0) as u16
}

/// Convert a socket feed chunk
///
/// `raw` holds `channel_count * samples_per_chunk` values. With `transpose`
/// set, `raw` is channel-major (`raw[ch * samples + s]`) and the output is
/// written sample-major (`out[s * channels + ch]`). Without it the ordering
/// is kept and only values are converted.
pub fn convert_socket_chunk(raw: &[u16], out: &mut [f32], geometry: &Geometry, transpose: bool) {
    let len = geometry.chunk_len();
    let raw = &raw[..len];
    let out = &mut out[..len];
    let scale = geometry.byte_scale;

    if transpose {
        let channels = geometry.channel_count;
        let samples = geometry.samples_per_chunk;
        let mut k = 0;
        for s in 0..samples {
            for ch in 0..channels {
                out[k] = raw_to_voltage(raw[ch * samples + s], scale);
                k += 1;
            }
        }
    } else {
        for (dst, &src) in out.iter_mut().zip(raw) {
            *dst = raw_to_voltage(src, scale);
        }
    }
}

/// Convert streaming-client rows (`rows[sample][channel]`) into `out`
///
/// Rows are already centered so only the scale is applied. Returns the
/// number of rows written. The caller checks row count and width.
pub fn convert_stream_rows(
    rows: &[Vec<f32>],
    out: &mut [f32],
    channel_count: usize,
    scale: f32,
) -> usize {
    for (row, dst) in rows.iter().zip(out.chunks_exact_mut(channel_count)) {
        for (d, &v) in dst.iter_mut().zip(row) {
            *d = scale * v;
        }
    }
    rows.len()
}

/// Transpose a `rows x cols` row-major matrix from `src` into `dst`
pub fn transpose_into<T: Copy>(src: &[T], dst: &mut [T], rows: usize, cols: usize) {
    debug_assert!(src.len() >= rows * cols && dst.len() >= rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

//! Engine configuration
//!
//! Operator-facing settings for the acquisition engine. Every field carries a
//! serde default so partial JSON documents load cleanly. Settings are only
//! applied while the engine is idle.

use crate::acquisition::geometry::Geometry;
use crate::adapter::Protocol;
use crate::error::{AcquisitionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default UDP port for the socket feed
pub const DEFAULT_PORT: u16 = 9001;

/// Default channel count for the socket feed
pub const DEFAULT_NUM_CHANNELS: usize = 64;

/// Default samples per chunk for the socket feed
pub const DEFAULT_NUM_SAMPLES: usize = 256;

/// Default sample rate in Hz for the socket feed
pub const DEFAULT_SAMPLE_RATE: f64 = 30000.0;

/// Microvolts per LSB of the 16-bit socket feed
pub const DEFAULT_DATA_SCALE: f32 = 0.195;

/// Destination ring buffer capacity in frames
pub const DEFAULT_BUFFER_CAPACITY: usize = 10000;

fn default_protocol() -> Protocol {
    Protocol::SocketFeed
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_channel_count() -> usize {
    DEFAULT_NUM_CHANNELS
}

fn default_samples_per_chunk() -> usize {
    DEFAULT_NUM_SAMPLES
}

fn default_sample_rate() -> f64 {
    DEFAULT_SAMPLE_RATE
}

fn default_byte_scale() -> f32 {
    DEFAULT_DATA_SCALE
}

fn default_transpose() -> bool {
    true
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_stop_timeout_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_diagnostics_interval_ms() -> u64 {
    5000
}

/// Acquisition engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Active protocol
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    /// UDP port the socket feed binds to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of channels per chunk (overwritten by streaming-client negotiation)
    #[serde(default = "default_channel_count")]
    pub channel_count: usize,
    /// Samples per channel in one chunk
    #[serde(default = "default_samples_per_chunk")]
    pub samples_per_chunk: usize,
    /// Sample rate in Hz (overwritten by streaming-client negotiation)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Volts-per-LSB scale applied during conversion
    #[serde(default = "default_byte_scale")]
    pub byte_scale: f32,
    /// Whether socket datagrams are channel-major and must be transposed
    #[serde(default = "default_transpose")]
    pub transpose: bool,
    /// Destination ring buffer capacity in frames
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// How long `stop_acquisition` waits for the worker to exit
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// How long the socket feed waits for the first datagram when connecting
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Read timeout slice used to keep blocking pulls cancellable
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Period of the diagnostics timer
    #[serde(default = "default_diagnostics_interval_ms")]
    pub diagnostics_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            port: default_port(),
            channel_count: default_channel_count(),
            samples_per_chunk: default_samples_per_chunk(),
            sample_rate: default_sample_rate(),
            byte_scale: default_byte_scale(),
            transpose: default_transpose(),
            buffer_capacity: default_buffer_capacity(),
            stop_timeout_ms: default_stop_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            diagnostics_interval_ms: default_diagnostics_interval_ms(),
        }
    }
}

impl EngineSettings {
    /// Parse settings from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| AcquisitionError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings = Self::from_json_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded engine settings");
        Ok(settings)
    }

    /// Reject settings that cannot describe a valid chunk geometry
    pub fn validate(&self) -> Result<()> {
        self.geometry().validate()?;
        if self.buffer_capacity == 0 {
            return Err(AcquisitionError::Config(
                "buffer_capacity must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AcquisitionError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Operator-configured geometry
    pub fn geometry(&self) -> Geometry {
        Geometry {
            channel_count: self.channel_count,
            samples_per_chunk: self.samples_per_chunk,
            sample_rate: self.sample_rate,
            byte_scale: self.byte_scale,
        }
    }

    /// Settings with the geometry defaults of `protocol` applied
    pub fn for_protocol(protocol: Protocol) -> Self {
        let defaults = protocol.default_geometry();
        Self {
            protocol,
            channel_count: defaults.channel_count,
            samples_per_chunk: defaults.samples_per_chunk,
            sample_rate: defaults.sample_rate,
            byte_scale: defaults.byte_scale,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.protocol, Protocol::SocketFeed);
        assert_eq!(settings.port, 9001);
        assert_eq!(settings.channel_count, 64);
        assert_eq!(settings.samples_per_chunk, 256);
        assert_eq!(settings.stop_timeout_ms, 500);
        assert!(settings.transpose);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"port": 5000, "channel_count": 8}"#;
        let settings = EngineSettings::from_json_str(json).unwrap();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.channel_count, 8);
        assert_eq!(settings.samples_per_chunk, DEFAULT_NUM_SAMPLES);
        assert_eq!(settings.byte_scale, DEFAULT_DATA_SCALE);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings = EngineSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_protocol_names() {
        let json = r#"{"protocol": "stream_client_feed"}"#;
        let settings = EngineSettings::from_json_str(json).unwrap();
        assert_eq!(settings.protocol, Protocol::StreamClientFeed);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let json = r#"{"channel_count": 0}"#;
        let err = EngineSettings::from_json_str(json).unwrap_err();
        assert!(matches!(err, AcquisitionError::InvalidGeometry(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = EngineSettings::from_json_str("{port:").unwrap_err();
        assert!(matches!(err, AcquisitionError::Config(_)));
    }

    #[test]
    fn test_stream_client_defaults() {
        let settings = EngineSettings::for_protocol(Protocol::StreamClientFeed);
        assert_eq!(settings.channel_count, 8);
        assert_eq!(settings.samples_per_chunk, 100);
        assert_eq!(settings.port, DEFAULT_PORT);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"port": 7001, "transpose": false}"#).unwrap();

        let settings = EngineSettings::load(&path).unwrap();
        assert_eq!(settings.port, 7001);
        assert!(!settings.transpose);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineSettings::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, AcquisitionError::Io(_)));
    }
}

//! Host data-thread contract
//!
//! The acquisition host drives a source through this trait: it asks for
//! channel layout and rate, starts and stops sessions and fires a periodic
//! timer. Failures surface as `false` here and in detail on the status
//! channel.

use super::diagnostics::DiagnosticsReport;
use super::engine::{AcquisitionEngine, ChannelType};

/// What the host needs from a data source
pub trait DataThread {
    fn found_input_source(&self) -> bool;

    /// Begin a session; false if it could not start
    fn start_acquisition(&mut self) -> bool;

    /// End a session; false only if a worker is still running afterwards
    fn stop_acquisition(&mut self) -> bool;

    /// Periodic health check
    fn timer_callback(&mut self) -> Option<DiagnosticsReport>;

    fn num_channels(&self) -> usize;

    fn num_data_outputs(&self, channel_type: ChannelType) -> usize;

    fn num_ttl_outputs(&self) -> usize;

    fn sample_rate(&self) -> f64;

    fn bit_volts(&self) -> f32;

    fn uses_custom_names(&self) -> bool;
}

impl DataThread for AcquisitionEngine {
    fn found_input_source(&self) -> bool {
        AcquisitionEngine::found_input_source(self)
    }

    fn start_acquisition(&mut self) -> bool {
        match AcquisitionEngine::start_acquisition(self) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Host start request failed");
                false
            }
        }
    }

    fn stop_acquisition(&mut self) -> bool {
        AcquisitionEngine::stop_acquisition(self).is_ok()
    }

    fn timer_callback(&mut self) -> Option<DiagnosticsReport> {
        AcquisitionEngine::timer_callback(self)
    }

    fn num_channels(&self) -> usize {
        AcquisitionEngine::num_channels(self)
    }

    fn num_data_outputs(&self, channel_type: ChannelType) -> usize {
        AcquisitionEngine::num_data_outputs(self, channel_type)
    }

    fn num_ttl_outputs(&self) -> usize {
        AcquisitionEngine::num_ttl_outputs(self)
    }

    fn sample_rate(&self) -> f64 {
        AcquisitionEngine::sample_rate(self)
    }

    fn bit_volts(&self) -> f32 {
        AcquisitionEngine::bit_volts(self)
    }

    fn uses_custom_names(&self) -> bool {
        AcquisitionEngine::uses_custom_names(self)
    }
}

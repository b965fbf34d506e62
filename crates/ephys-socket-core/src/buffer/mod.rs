//! Destination buffer consumed by the downstream processing pipeline

pub mod data_buffer;

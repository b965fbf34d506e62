//! E2E tests for engine configuration
//!
//! Settings files drive engine construction, invalid geometry is refused
//! up front, and the setters keep the engine's view of its settings in
//! step with what the next session will use.

use ephys_socket::{AcquisitionEngine, AcquisitionError, ChannelType, EngineSettings, Protocol};

fn reserved() -> EngineSettings {
    EngineSettings {
        protocol: Protocol::Reserved,
        ..EngineSettings::default()
    }
}

#[test]
fn test_engine_from_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rig.json");
    std::fs::write(
        &path,
        r#"{
            "protocol": "reserved",
            "channel_count": 32,
            "samples_per_chunk": 128,
            "sample_rate": 20000.0,
            "byte_scale": 0.5
        }"#,
    )
    .unwrap();

    let settings = EngineSettings::load(&path).unwrap();
    let engine = AcquisitionEngine::new(settings).unwrap();
    assert_eq!(engine.protocol(), Protocol::Reserved);
    assert_eq!(engine.num_channels(), 32);
    assert_eq!(engine.num_data_outputs(ChannelType::Headstage), 32);
    assert_eq!(engine.sample_rate(), 20000.0);
    assert_eq!(engine.bit_volts(), 0.5);
    assert_eq!(engine.destination().channel_count(), 32);
}

#[test]
fn test_invalid_geometry_refused_at_construction() {
    let settings = EngineSettings {
        samples_per_chunk: 0,
        ..reserved()
    };
    assert!(matches!(
        AcquisitionEngine::new(settings),
        Err(AcquisitionError::InvalidGeometry(_))
    ));

    let settings = EngineSettings {
        sample_rate: 0.0,
        ..reserved()
    };
    assert!(AcquisitionEngine::new(settings).is_err());
}

#[test]
fn test_setters_update_settings() {
    let mut engine = AcquisitionEngine::new(reserved()).unwrap();

    engine.set_channel_count(16).unwrap();
    engine.set_samples_per_chunk(64).unwrap();
    engine.set_sample_rate(1000.0).unwrap();
    engine.set_byte_scale(1.0).unwrap();
    engine.set_transpose(false).unwrap();
    engine.set_port(9100).unwrap();

    let settings = engine.settings();
    assert_eq!(settings.channel_count, 16);
    assert_eq!(settings.samples_per_chunk, 64);
    assert_eq!(settings.sample_rate, 1000.0);
    assert_eq!(settings.byte_scale, 1.0);
    assert!(!settings.transpose);
    assert_eq!(settings.port, 9100);
    assert_eq!(engine.num_channels(), 16);
}

#[test]
fn test_rejected_setter_leaves_settings_unchanged() {
    let mut engine = AcquisitionEngine::new(reserved()).unwrap();
    let before = engine.settings().clone();

    assert!(engine.set_channel_count(0).is_err());
    assert!(engine.set_sample_rate(-1.0).is_err());
    assert_eq!(engine.settings(), &before);
}

#[test]
fn test_version_constants() {
    assert!(!ephys_socket::VERSION.is_empty());
    assert_eq!(ephys_socket::BUILD_DATE.len(), 10, "YYYY-MM-DD");
}

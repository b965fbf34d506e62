//! Ephys Socket - command-line acquisition runner
//!
//! Connects to a source, runs an acquisition session and drains the
//! destination buffer, printing throughput once per second.

use anyhow::{bail, Context, Result};
use ephys_socket::acquisition::convert::voltage_to_raw;
use ephys_socket::acquisition::Geometry;
use ephys_socket::{AcquisitionEngine, EngineSettings, Protocol, StatusLevel};
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    protocol: Option<Protocol>,
    port: Option<u16>,
    channels: Option<usize>,
    samples: Option<usize>,
    rate: Option<f64>,
    no_transpose: bool,
    duration: Option<f64>,
    simulate: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ephys_socket=info".parse()?)
                .add_directive("ephys_socket_core=info".parse()?),
        )
        .init();

    let Some(options) = parse_args(std::env::args().skip(1))? else {
        return Ok(());
    };

    println!(
        "Ephys Socket v{} (built {})",
        ephys_socket::VERSION,
        ephys_socket::BUILD_DATE
    );
    println!();

    let settings = build_settings(&options)?;
    run(settings, &options)
}

fn print_help() {
    println!("Usage: ephys-socket [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config FILE       Load engine settings from a JSON file");
    println!("  -p, --protocol NAME     socket | stream | reserved (default: socket)");
    println!("      --port N            UDP port for the socket feed");
    println!("      --channels N        Channels per chunk");
    println!("      --samples N         Samples per channel per chunk");
    println!("  -r, --rate HZ           Nominal sample rate");
    println!("      --no-transpose      Datagrams are already sample-major");
    println!("  -d, --duration SECS     Stop after this many seconds");
    println!("      --simulate          Send sine-wave datagrams to the socket feed");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  ephys-socket --simulate --channels 16 --samples 64 --rate 20000");
    println!("  ephys-socket --config rig.json --duration 60");
}

fn next_value<I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<String> {
    match args.next() {
        Some(value) => Ok(value),
        None => bail!("{} requires a value", flag),
    }
}

fn parse_value<T, I>(args: &mut I, flag: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    I: Iterator<Item = String>,
{
    let value = next_value(args, flag)?;
    value
        .parse()
        .with_context(|| format!("Invalid {}: {}", what, value))
}

fn parse_protocol(name: &str) -> Result<Protocol> {
    match name {
        "socket" => Ok(Protocol::SocketFeed),
        "stream" | "lsl" => Ok(Protocol::StreamClientFeed),
        "reserved" => Ok(Protocol::Reserved),
        other => bail!("Unknown protocol: {}", other),
    }
}

/// Parse command-line arguments; `None` means the run is already complete
fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<Option<Options>> {
    let mut options = Options::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--version" | "-v" => {
                println!("ephys-socket {}", ephys_socket::VERSION);
                return Ok(None);
            }
            "--config" | "-c" => {
                options.config = Some(PathBuf::from(next_value(&mut args, &arg)?));
            }
            "--protocol" | "-p" => {
                options.protocol = Some(parse_protocol(&next_value(&mut args, &arg)?)?);
            }
            "--port" => options.port = Some(parse_value(&mut args, &arg, "port")?),
            "--channels" => {
                options.channels = Some(parse_value(&mut args, &arg, "channel count")?);
            }
            "--samples" => {
                options.samples = Some(parse_value(&mut args, &arg, "sample count")?);
            }
            "--rate" | "-r" => options.rate = Some(parse_value(&mut args, &arg, "sample rate")?),
            "--duration" | "-d" => {
                options.duration = Some(parse_value(&mut args, &arg, "duration")?);
            }
            "--no-transpose" => options.no_transpose = true,
            "--simulate" => options.simulate = true,
            other => {
                print_help();
                bail!("Unknown argument: {}", other);
            }
        }
    }

    Ok(Some(options))
}

fn build_settings(options: &Options) -> Result<EngineSettings> {
    let mut settings = match &options.config {
        Some(path) => EngineSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => EngineSettings::for_protocol(options.protocol.unwrap_or(Protocol::SocketFeed)),
    };

    if let Some(protocol) = options.protocol {
        settings.protocol = protocol;
    }
    if let Some(port) = options.port {
        settings.port = port;
    }
    if let Some(channels) = options.channels {
        settings.channel_count = channels;
    }
    if let Some(samples) = options.samples {
        settings.samples_per_chunk = samples;
    }
    if let Some(rate) = options.rate {
        settings.sample_rate = rate;
    }
    if options.no_transpose {
        settings.transpose = false;
    }

    settings.validate()?;
    Ok(settings)
}

#[cfg(feature = "lsl-support")]
fn create_engine(settings: EngineSettings) -> Result<AcquisitionEngine> {
    if settings.protocol == Protocol::StreamClientFeed {
        let client = ephys_socket_core::LslClient::new("EEG", None);
        return Ok(AcquisitionEngine::with_stream_client(settings, Box::new(client))?);
    }
    Ok(AcquisitionEngine::new(settings)?)
}

#[cfg(not(feature = "lsl-support"))]
fn create_engine(settings: EngineSettings) -> Result<AcquisitionEngine> {
    if settings.protocol == Protocol::StreamClientFeed {
        warn!("Built without lsl-support; no streaming client is available");
    }
    Ok(AcquisitionEngine::new(settings)?)
}

/// Encode one chunk of sine waves starting at `sample_index`
///
/// Channel `c` carries a 100 µV sine at `10 * (c + 1)` Hz.
fn fill_datagram(datagram: &mut [u8], geometry: &Geometry, transpose: bool, sample_index: u64) {
    let channels = geometry.channel_count;
    let samples = geometry.samples_per_chunk;
    for s in 0..samples {
        let t = (sample_index + s as u64) as f64 / geometry.sample_rate;
        for c in 0..channels {
            let freq = 10.0 * (c + 1) as f64;
            let value = (100.0 * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32;
            let raw = voltage_to_raw(value, geometry.byte_scale);
            let index = if transpose {
                c * samples + s
            } else {
                s * channels + c
            };
            datagram[index * 2..index * 2 + 2].copy_from_slice(&raw.to_le_bytes());
        }
    }
}

/// Local UDP sender producing sine-wave chunks in wire format
struct Simulator {
    shutdown_tx: Option<crossbeam_channel::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Simulator {
    fn start(settings: &EngineSettings) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").context("Failed to bind simulator socket")?;
        socket
            .connect(("127.0.0.1", settings.port))
            .context("Failed to address simulator socket")?;

        let geometry = Geometry {
            channel_count: settings.channel_count,
            samples_per_chunk: settings.samples_per_chunk,
            sample_rate: settings.sample_rate,
            byte_scale: settings.byte_scale,
        };
        let channels = geometry.channel_count;
        let samples = geometry.samples_per_chunk;
        let rate = geometry.sample_rate;
        let transpose = settings.transpose;
        let period = Duration::from_secs_f64(samples as f64 / rate);

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(period);

        let thread = std::thread::Builder::new()
            .name("ephys-simulator".into())
            .spawn(move || {
                let mut datagram = vec![0u8; channels * samples * 2];
                let mut sample_index = 0u64;
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {
                            fill_datagram(&mut datagram, &geometry, transpose, sample_index);
                            sample_index += samples as u64;
                            if let Err(e) = socket.send(&datagram) {
                                tracing::debug!(error = %e, "Simulator send failed");
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })?;

        info!(port = settings.port, channels, samples, rate, "Simulator started");
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        self.shutdown_tx.take();
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(settings: EngineSettings, options: &Options) -> Result<()> {
    println!(
        "Protocol: {} | Port: {} | {} channels x {} samples @ {} Hz",
        settings.protocol,
        settings.port,
        settings.channel_count,
        settings.samples_per_chunk,
        settings.sample_rate
    );
    println!();

    let mut simulator = if options.simulate {
        if settings.protocol != Protocol::SocketFeed {
            bail!("--simulate only drives the socket feed");
        }
        Some(Simulator::start(&settings)?)
    } else {
        None
    };

    let mut engine = create_engine(settings)?;
    let status = engine.status_events();

    if !engine.found_input_source() {
        println!("Waiting for input source...");
    }

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    while running.load(Ordering::SeqCst) && !engine.found_input_source() {
        std::thread::sleep(Duration::from_millis(500));
        if let Err(e) = engine.try_to_connect() {
            tracing::debug!(error = %e, "Still no input source");
        }
    }
    if !running.load(Ordering::SeqCst) {
        return Ok(());
    }

    if let Err(e) = engine.start_acquisition() {
        error!("Failed to start acquisition: {}", e);
        println!("Error: {}", e);
        return Ok(());
    }

    println!("Acquisition started. Press Ctrl+C to stop.");
    println!();

    let destination = engine.destination();
    let started = Instant::now();
    let deadline = options.duration.map(Duration::from_secs_f64);
    let mut last_print = Instant::now();
    let mut frames_since_print = 0usize;
    let mut last_value = 0.0f32;

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }

        let frames = destination.read(usize::MAX);
        frames_since_print += frames.frame_count();
        if let Some(&value) = frames.samples.last() {
            last_value = value;
        }

        for event in status.try_iter() {
            match event.level {
                StatusLevel::Info => info!("{}", event.message),
                StatusLevel::Warning => warn!("{}", event.message),
                StatusLevel::Error => error!("{}", event.message),
            }
        }

        if last_print.elapsed() >= Duration::from_secs(1) {
            let rate = frames_since_print as f64 / last_print.elapsed().as_secs_f64();
            println!(
                "Rate: {:>9.1} Hz | Total: {:>10} | Last: {:>8.2} | Overflowed: {}",
                rate,
                engine.total_samples(),
                last_value,
                destination.overflowed_frames()
            );
            frames_since_print = 0;
            last_print = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping...");
    engine.stop_acquisition()?;
    if let Some(sim) = simulator.as_mut() {
        sim.stop();
    }
    if let Some(report) = engine.last_diagnostics() {
        println!(
            "Last diagnostics: {} / {} samples ({:.1}%)",
            report.actual_samples,
            report.expected_samples,
            report.relative_rate * 100.0
        );
    }
    println!("Done. {} samples per channel acquired.", engine.total_samples());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephys_socket::acquisition::convert::raw_to_voltage;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_overrides() {
        let options = parse_args(args(&[
            "--port",
            "9100",
            "--channels",
            "16",
            "--samples",
            "32",
            "--rate",
            "2000",
            "--no-transpose",
        ]))
        .unwrap()
        .unwrap();
        let settings = build_settings(&options).unwrap();
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.channel_count, 16);
        assert_eq!(settings.samples_per_chunk, 32);
        assert_eq!(settings.sample_rate, 2000.0);
        assert!(!settings.transpose);
        assert_eq!(settings.protocol, Protocol::SocketFeed);
    }

    #[test]
    fn test_parse_protocol_names() {
        assert_eq!(parse_protocol("stream").unwrap(), Protocol::StreamClientFeed);
        assert_eq!(parse_protocol("reserved").unwrap(), Protocol::Reserved);
        assert!(parse_protocol("bonsai-rda").is_err());
    }

    #[test]
    fn test_stream_protocol_uses_stream_defaults() {
        let options = parse_args(args(&["--protocol", "stream"])).unwrap().unwrap();
        let settings = build_settings(&options).unwrap();
        assert_eq!(settings.channel_count, 8);
        assert_eq!(settings.samples_per_chunk, 100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse_args(args(&["--port"])).is_err());
        assert!(parse_args(args(&["--port", "eighty"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());

        let options = parse_args(args(&["--samples", "0"])).unwrap().unwrap();
        assert!(build_settings(&options).is_err());
    }

    #[test]
    fn test_transpose_is_default() {
        let options = parse_args(args(&[])).unwrap().unwrap();
        assert!(build_settings(&options).unwrap().transpose);
    }

    #[test]
    fn test_fill_datagram_layouts() {
        let geometry = Geometry {
            channel_count: 2,
            samples_per_chunk: 3,
            sample_rate: 1000.0,
            byte_scale: 0.195,
        };
        let mut channel_major = vec![0u8; 12];
        let mut sample_major = vec![0u8; 12];
        fill_datagram(&mut channel_major, &geometry, true, 7);
        fill_datagram(&mut sample_major, &geometry, false, 7);

        let word = |d: &[u8], i: usize| u16::from_le_bytes([d[i * 2], d[i * 2 + 1]]);
        for s in 0..3 {
            for c in 0..2 {
                assert_eq!(word(&channel_major, c * 3 + s), word(&sample_major, s * 2 + c));
            }
        }
        let amplitude = (0..6)
            .map(|i| raw_to_voltage(word(&sample_major, i), 0.195).abs())
            .fold(0.0f32, f32::max);
        assert!(amplitude <= 100.2);
    }

    #[test]
    fn test_help_completes_run() {
        assert!(parse_args(args(&["--help"])).unwrap().is_none());
    }
}

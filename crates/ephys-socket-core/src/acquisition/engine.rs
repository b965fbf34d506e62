//! Acquisition engine
//!
//! Owns the active protocol adapter, the per-chunk buffers and the
//! connection state, and runs the pull → convert → publish loop on a
//! dedicated worker thread.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start--> Negotiating --> Running --stop--> Idle
//! ```
//!
//! Everything that reshapes buffers (protocol switch, geometry setters,
//! reconnect) is only accepted while Idle. While Running, the worker owns
//! the [`AcquisitionCore`] outright and hands it back when it exits, so
//! the host thread can never touch buffers the worker is writing.
//!
//! A stop request that outlives `stop_timeout_ms` leaves the worker
//! detached but remembered: the engine refuses to start, reconnect or
//! reconfigure until that worker has actually exited.

use crate::acquisition::convert::{convert_socket_chunk, convert_stream_rows};
use crate::acquisition::diagnostics::{Diagnostics, DiagnosticsReport, DiagnosticsTimer};
use crate::acquisition::geometry::{ChunkBuffers, Geometry};
use crate::adapter::{
    Adapter, ChunkPayload, ConnectionState, Protocol, ProtocolAdapter, StreamClient,
};
use crate::buffer::data_buffer::DataBuffer;
use crate::config::EngineSettings;
use crate::error::{AcquisitionError, Result};
use crate::status::{StatusEvent, StatusReporter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not acquiring; configuration may change
    Idle,
    /// Negotiating geometry and resizing buffers
    Negotiating,
    /// Worker is pulling and publishing chunks
    Running,
}

/// Data channel categories the host asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Headstage,
    Aux,
    Adc,
}

/// Worker-owned acquisition state
///
/// Holds everything one pull/convert/publish step needs. The engine keeps
/// it while Idle and moves it into the worker thread while Running.
pub struct AcquisitionCore {
    adapter: Adapter,
    geometry: Geometry,
    transpose: bool,
    buffer_capacity: usize,
    poll_interval: Duration,
    buffers: ChunkBuffers,
    destination: Arc<DataBuffer>,
    total_samples: Arc<AtomicU64>,
    status: StatusReporter,
}

impl AcquisitionCore {
    pub fn new(
        adapter: Adapter,
        settings: &EngineSettings,
        destination: Arc<DataBuffer>,
        total_samples: Arc<AtomicU64>,
        status: StatusReporter,
    ) -> Self {
        Self {
            adapter,
            geometry: settings.geometry(),
            transpose: settings.transpose,
            buffer_capacity: settings.buffer_capacity,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            buffers: ChunkBuffers::new(),
            destination,
            total_samples,
            status,
        }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut Adapter {
        &mut self.adapter
    }

    /// Geometry of the current (or next) session
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn buffers(&self) -> &ChunkBuffers {
        &self.buffers
    }

    /// Negotiate geometry with the source and resize every buffer for it
    pub fn prepare(&mut self) -> Result<Geometry> {
        let geometry = self.adapter.negotiate(&self.geometry)?;
        self.buffers.apply_resize(
            &geometry,
            self.adapter.raw_sample_width(),
            &self.destination,
            self.buffer_capacity,
        )?;
        self.geometry = geometry;
        tracing::info!(
            protocol = %self.adapter.protocol(),
            channels = geometry.channel_count,
            samples_per_chunk = geometry.samples_per_chunk,
            sample_rate = geometry.sample_rate,
            "Acquisition buffers prepared"
        );
        Ok(geometry)
    }

    /// Pull one chunk, convert it and publish it to the destination buffer
    ///
    /// Returns the number of samples per channel published. A failed pull
    /// publishes nothing and leaves the sample counter untouched. A chunk
    /// that arrives after `cancel` was set is discarded.
    pub fn update_buffer(&mut self, cancel: &AtomicBool) -> Result<usize> {
        let result = self.pull_and_publish(cancel);
        if let Err(AcquisitionError::ShapeMismatch { expected, actual }) = result {
            tracing::warn!(expected, actual, "Data shape mismatch, dropping chunk");
            self.status.warn("Ephys Socket: Data shape mismatch");
        }
        result
    }

    fn pull_and_publish(&mut self, cancel: &AtomicBool) -> Result<usize> {
        let geometry = self.geometry;
        if self.buffers.converted.len() != geometry.chunk_len() {
            return Err(AcquisitionError::InvalidGeometry(
                "buffers not prepared for current geometry".to_string(),
            ));
        }

        let payload = self.adapter.pull_chunk(&mut self.buffers.raw, cancel)?;

        if cancel.load(Ordering::Acquire) {
            return Err(AcquisitionError::Cancelled);
        }

        let published_before = self.total_samples.load(Ordering::Acquire);
        let frames = match payload {
            ChunkPayload::Raw { .. } => {
                convert_socket_chunk(
                    self.buffers.raw.samples.as_slice(),
                    self.buffers.converted.as_mut_slice(),
                    &geometry,
                    self.transpose,
                );
                // Seconds since acquisition start, one per sample
                for (i, ts) in self.buffers.timestamps.iter_mut().enumerate() {
                    *ts = (published_before + i as u64) as f64 / geometry.sample_rate;
                }
                geometry.samples_per_chunk
            }
            ChunkPayload::Rows(chunk) => {
                let rows = chunk.rows.len();
                if rows > geometry.samples_per_chunk || chunk.timestamps.len() < rows {
                    return Err(AcquisitionError::ShapeMismatch {
                        expected: geometry.samples_per_chunk,
                        actual: rows,
                    });
                }
                convert_stream_rows(
                    &chunk.rows,
                    self.buffers.converted.as_mut_slice(),
                    geometry.channel_count,
                    geometry.byte_scale,
                );
                self.buffers.timestamps[..rows].copy_from_slice(&chunk.timestamps[..rows]);
                rows
            }
        };

        if frames == 0 {
            return Ok(0);
        }

        self.destination.append(
            &self.buffers.converted.as_slice()[..frames * geometry.channel_count],
            &self.buffers.timestamps[..frames],
            &self.buffers.event_words[..frames],
            frames,
        );
        self.total_samples.fetch_add(frames as u64, Ordering::Release);

        tracing::trace!(frames, "Published chunk");
        Ok(frames)
    }
}

/// Handle on a spawned acquisition worker
struct Worker {
    stop: Arc<AtomicBool>,
    done_rx: crossbeam_channel::Receiver<()>,
    thread: std::thread::JoinHandle<AcquisitionCore>,
}

impl Worker {
    /// Non-consuming check; the done signal stays queued for `stop`
    fn has_exited(&self) -> bool {
        self.thread.is_finished() || !self.done_rx.is_empty()
    }
}

/// Worker thread body: loop until stopped, then hand the core back
fn run_worker(
    mut core: AcquisitionCore,
    stop: Arc<AtomicBool>,
    done_tx: crossbeam_channel::Sender<()>,
) -> AcquisitionCore {
    tracing::info!("Acquisition worker running");

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        while !stop.load(Ordering::Acquire) {
            match core.update_buffer(&stop) {
                Ok(_) => {}
                Err(AcquisitionError::Cancelled) => break,
                Err(AcquisitionError::ShapeMismatch { .. }) => {}
                Err(e) if !e.is_recoverable() => {
                    tracing::error!(error = %e, "Fatal acquisition error, ending session");
                    core.status.error(format!("Ephys Socket: {}", e));
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Pull failed, retrying");
                    std::thread::sleep(core.poll_interval);
                }
            }
        }
    }));

    match result {
        Ok(()) => tracing::info!("Acquisition worker exited normally"),
        Err(panic_info) => {
            let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            tracing::error!(panic = %msg, "Acquisition worker PANICKED");
            core.status.error(format!("Ephys Socket: acquisition worker panicked: {}", msg));
        }
    }

    let _ = done_tx.send(());
    core
}

/// Protocol-polymorphic acquisition engine
pub struct AcquisitionEngine {
    settings: EngineSettings,
    state: EngineState,
    /// Present while no worker owns it
    core: Option<AcquisitionCore>,
    /// Active worker while Running; a stuck worker after a timed-out stop
    worker: Option<Worker>,
    /// Streaming client parked while another protocol is active
    spare_client: Option<Box<dyn StreamClient>>,
    connection: ConnectionState,
    local_addr: Option<SocketAddr>,
    destination: Arc<DataBuffer>,
    total_samples: Arc<AtomicU64>,
    status: StatusReporter,
    status_rx: crossbeam_channel::Receiver<StatusEvent>,
    diagnostics: Option<Arc<Diagnostics>>,
    timer: Option<DiagnosticsTimer>,
}

impl AcquisitionEngine {
    /// Create an engine and attempt a first connection
    ///
    /// A failed first connection is reported but not fatal; call
    /// [`Self::try_to_connect`] to retry.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        Self::build(settings, None)
    }

    /// Create an engine that uses `client` for the streaming-client protocol
    pub fn with_stream_client(
        settings: EngineSettings,
        client: Box<dyn StreamClient>,
    ) -> Result<Self> {
        Self::build(settings, Some(client))
    }

    fn build(settings: EngineSettings, client: Option<Box<dyn StreamClient>>) -> Result<Self> {
        settings.validate()?;

        let destination = Arc::new(DataBuffer::new(
            settings.channel_count,
            settings.buffer_capacity,
        ));
        let total_samples = Arc::new(AtomicU64::new(0));
        let (status, status_rx) = StatusReporter::channel();

        let (active_client, spare_client) = if settings.protocol == Protocol::StreamClientFeed {
            (client, None)
        } else {
            (None, client)
        };
        let adapter = Adapter::for_protocol(settings.protocol, &settings, active_client);
        let core = AcquisitionCore::new(
            adapter,
            &settings,
            Arc::clone(&destination),
            Arc::clone(&total_samples),
            status.clone(),
        );

        let mut engine = Self {
            settings,
            state: EngineState::Idle,
            core: Some(core),
            worker: None,
            spare_client,
            connection: ConnectionState::Disconnected,
            local_addr: None,
            destination,
            total_samples,
            status,
            status_rx,
            diagnostics: None,
            timer: None,
        };

        if let Err(e) = engine.try_to_connect() {
            tracing::info!(error = %e, "No input source at startup");
        }

        Ok(engine)
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Current settings (geometry reflects the last negotiation)
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Active protocol
    pub fn protocol(&self) -> Protocol {
        self.settings.protocol
    }

    /// Connection state from the last connect attempt
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Whether a source is connected and delivering data
    pub fn found_input_source(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Local address of the socket feed, when bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Destination ring buffer shared with the downstream consumer
    pub fn destination(&self) -> Arc<DataBuffer> {
        Arc::clone(&self.destination)
    }

    /// Samples per channel published since the last start
    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Acquire)
    }

    /// Receiver for host status events
    pub fn status_events(&self) -> crossbeam_channel::Receiver<StatusEvent> {
        self.status_rx.clone()
    }

    /// Most recent diagnostics report
    pub fn last_diagnostics(&self) -> Option<DiagnosticsReport> {
        self.diagnostics.as_ref().and_then(|d| d.last_report())
    }

    /// Take a diagnostics report now
    pub fn timer_callback(&self) -> Option<DiagnosticsReport> {
        self.diagnostics.as_ref().map(|d| d.tick())
    }

    /// Whether a worker thread (active or stuck) still exists
    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.has_exited())
    }

    pub fn num_channels(&self) -> usize {
        self.settings.channel_count
    }

    pub fn num_data_outputs(&self, channel_type: ChannelType) -> usize {
        match channel_type {
            ChannelType::Headstage => self.settings.channel_count,
            ChannelType::Aux | ChannelType::Adc => 0,
        }
    }

    /// No adapter produces TTL events yet
    pub fn num_ttl_outputs(&self) -> usize {
        0
    }

    pub fn sample_rate(&self) -> f64 {
        self.settings.sample_rate
    }

    /// Volts per LSB
    pub fn bit_volts(&self) -> f32 {
        self.settings.byte_scale
    }

    pub fn uses_custom_names(&self) -> bool {
        false
    }

    /// (Re)connect the active adapter
    ///
    /// Tears down any existing connection first. On success the negotiated
    /// channel count and sample rate replace the configured ones.
    pub fn try_to_connect(&mut self) -> Result<ConnectionState> {
        self.ensure_idle()?;
        let core = self.core.as_mut().ok_or(AcquisitionError::WorkerStillRunning)?;

        let requested = core.geometry;
        let result = core
            .adapter
            .connect(&requested)
            .and_then(|_| core.adapter.negotiate(&requested));

        self.connection = core.adapter.connection_state();
        self.local_addr = core.adapter.local_addr();

        match result {
            Ok(geometry) => {
                core.geometry = geometry;
                self.settings.channel_count = geometry.channel_count;
                self.settings.sample_rate = geometry.sample_rate;
                self.status.info(format!(
                    "Ephys Socket: connected ({}, {} channels @ {} Hz)",
                    self.settings.protocol, geometry.channel_count, geometry.sample_rate
                ));
                Ok(self.connection)
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Switch protocol and connect with it
    pub fn set_protocol(&mut self, protocol: Protocol) -> Result<ConnectionState> {
        self.ensure_idle()?;
        let core = self.core.as_mut().ok_or(AcquisitionError::WorkerStillRunning)?;

        if let Some(client) = core.adapter.take_stream_client() {
            self.spare_client = Some(client);
        }
        core.adapter.disconnect();

        let client = if protocol == Protocol::StreamClientFeed {
            self.spare_client.take()
        } else {
            None
        };
        self.settings.protocol = protocol;
        core.adapter = Adapter::for_protocol(protocol, &self.settings, client);
        self.connection = ConnectionState::Disconnected;
        self.local_addr = None;

        tracing::info!(protocol = %protocol, "Protocol changed");
        self.try_to_connect()
    }

    /// Change the UDP port; takes effect on the next connect
    pub fn set_port(&mut self, port: u16) -> Result<()> {
        self.ensure_idle()?;
        let core = self.core.as_mut().ok_or(AcquisitionError::WorkerStillRunning)?;
        core.adapter.set_port(port);
        self.settings.port = port;
        Ok(())
    }

    pub fn set_channel_count(&mut self, channel_count: usize) -> Result<()> {
        self.update_geometry(|g| g.channel_count = channel_count)
    }

    pub fn set_samples_per_chunk(&mut self, samples_per_chunk: usize) -> Result<()> {
        self.update_geometry(|g| g.samples_per_chunk = samples_per_chunk)
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        self.update_geometry(|g| g.sample_rate = sample_rate)
    }

    pub fn set_byte_scale(&mut self, byte_scale: f32) -> Result<()> {
        self.update_geometry(|g| g.byte_scale = byte_scale)
    }

    /// Whether socket datagrams are channel-major
    pub fn set_transpose(&mut self, transpose: bool) -> Result<()> {
        self.ensure_idle()?;
        let core = self.core.as_mut().ok_or(AcquisitionError::WorkerStillRunning)?;
        core.transpose = transpose;
        self.settings.transpose = transpose;
        Ok(())
    }

    fn update_geometry(&mut self, apply: impl FnOnce(&mut Geometry)) -> Result<()> {
        self.ensure_idle()?;
        let core = self.core.as_mut().ok_or(AcquisitionError::WorkerStillRunning)?;

        let mut geometry = core.geometry;
        apply(&mut geometry);
        geometry.validate()?;

        core.geometry = geometry;
        core.adapter.set_samples_per_chunk(geometry.samples_per_chunk);
        self.settings.channel_count = geometry.channel_count;
        self.settings.samples_per_chunk = geometry.samples_per_chunk;
        self.settings.sample_rate = geometry.sample_rate;
        self.settings.byte_scale = geometry.byte_scale;
        Ok(())
    }

    /// Start acquiring
    ///
    /// Requires a connected source. Negotiates and resizes before the
    /// worker's first pull, and resets the sample counter.
    pub fn start_acquisition(&mut self) -> Result<()> {
        self.ensure_idle()?;
        if self.connection != ConnectionState::Connected {
            return Err(AcquisitionError::NotConnected);
        }

        self.state = EngineState::Negotiating;
        let prepared = match self.core.as_mut() {
            Some(core) => core.prepare(),
            None => Err(AcquisitionError::WorkerStillRunning),
        };
        let geometry = match prepared {
            Ok(geometry) => geometry,
            Err(e) => {
                self.state = EngineState::Idle;
                self.report(&e);
                return Err(e);
            }
        };
        self.settings.channel_count = geometry.channel_count;
        self.settings.sample_rate = geometry.sample_rate;
        self.total_samples.store(0, Ordering::Release);

        let Some(core) = self.core.take() else {
            self.state = EngineState::Idle;
            return Err(AcquisitionError::WorkerStillRunning);
        };
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let worker_stop = Arc::clone(&stop);

        let spawned = std::thread::Builder::new()
            .name("ephys-acquisition".into())
            .spawn(move || run_worker(core, worker_stop, done_tx));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                // The core went down with the closure; start over from settings
                tracing::error!(error = %e, "Failed to spawn acquisition worker");
                self.core = Some(self.rebuild_core());
                self.connection = ConnectionState::Disconnected;
                self.state = EngineState::Idle;
                let err = AcquisitionError::from(e);
                self.report(&err);
                return Err(err);
            }
        };

        self.worker = Some(Worker {
            stop,
            done_rx,
            thread,
        });

        let diagnostics = Arc::new(Diagnostics::new(
            Arc::clone(&self.total_samples),
            geometry.sample_rate,
        ));
        match DiagnosticsTimer::start(
            Arc::clone(&diagnostics),
            Duration::from_millis(self.settings.diagnostics_interval_ms),
        ) {
            Ok(timer) => self.timer = Some(timer),
            Err(e) => tracing::warn!(error = %e, "Diagnostics timer unavailable"),
        }
        self.diagnostics = Some(diagnostics);

        self.state = EngineState::Running;
        tracing::info!(
            protocol = %self.settings.protocol,
            channels = geometry.channel_count,
            sample_rate = geometry.sample_rate,
            "Acquisition started"
        );
        Ok(())
    }

    /// Stop acquiring
    ///
    /// Signals the worker, waits up to `stop_timeout_ms` for it to exit,
    /// halts diagnostics and clears the destination buffer. A worker that
    /// misses the deadline is reported with [`AcquisitionError::StopTimeout`]
    /// and kept until it exits; the engine is Idle either way.
    pub fn stop_acquisition(&mut self) -> Result<()> {
        if self.state != EngineState::Running {
            return Ok(());
        }
        let Some(worker) = self.worker.take() else {
            self.state = EngineState::Idle;
            return Ok(());
        };

        worker.stop.store(true, Ordering::Release);
        let timeout = Duration::from_millis(self.settings.stop_timeout_ms);
        let exited = !matches!(
            worker.done_rx.recv_timeout(timeout),
            Err(crossbeam_channel::RecvTimeoutError::Timeout)
        );

        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
        self.destination.clear();
        self.state = EngineState::Idle;

        if exited {
            self.reclaim(worker);
            tracing::info!(samples = self.total_samples(), "Acquisition stopped");
            Ok(())
        } else {
            // The stuck worker still owns the adapter
            self.worker = Some(worker);
            self.connection = ConnectionState::Disconnected;
            let err = AcquisitionError::StopTimeout {
                timeout_ms: self.settings.stop_timeout_ms,
            };
            self.report(&err);
            Err(err)
        }
    }

    /// Require Idle and take back a worker that has since exited
    fn ensure_idle(&mut self) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(AcquisitionError::NotIdle(self.state));
        }
        if let Some(worker) = self.worker.take() {
            if worker.has_exited() {
                self.reclaim(worker);
            } else {
                self.worker = Some(worker);
                return Err(AcquisitionError::WorkerStillRunning);
            }
        }
        Ok(())
    }

    fn reclaim(&mut self, worker: Worker) {
        match worker.thread.join() {
            Ok(core) => {
                self.connection = core.adapter.connection_state();
                self.core = Some(core);
            }
            Err(_) => {
                tracing::error!("Acquisition worker could not be joined, rebuilding");
                self.core = Some(self.rebuild_core());
                self.connection = ConnectionState::Disconnected;
            }
        }
    }

    fn rebuild_core(&mut self) -> AcquisitionCore {
        let client = if self.settings.protocol == Protocol::StreamClientFeed {
            self.spare_client.take()
        } else {
            None
        };
        let adapter = Adapter::for_protocol(self.settings.protocol, &self.settings, client);
        AcquisitionCore::new(
            adapter,
            &self.settings,
            Arc::clone(&self.destination),
            Arc::clone(&self.total_samples),
            self.status.clone(),
        )
    }

    fn report(&self, err: &AcquisitionError) {
        match err {
            AcquisitionError::Allocation { .. } | AcquisitionError::Io(_) => {
                tracing::error!(error = %err, "Acquisition error");
                self.status.error(format!("Ephys Socket: {}", err));
            }
            _ => {
                tracing::warn!(error = %err, "Acquisition warning");
                self.status.warn(format!("Ephys Socket: {}", err));
            }
        }
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        let _ = self.stop_acquisition();
    }
}

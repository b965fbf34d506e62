//! Periodic acquisition health check
//!
//! A low-frequency timer compares the samples actually published against
//! what the nominal sample rate predicts. It only reads the shared atomic
//! sample counter and never touches worker-owned buffers.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One health-check result
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsReport {
    /// When the report was taken
    pub timestamp: DateTime<Utc>,
    /// Samples the nominal rate predicts for the interval
    pub expected_samples: u64,
    /// Samples actually published in the interval
    pub actual_samples: u64,
    /// `actual / expected` (0.0 when nothing was expected)
    pub relative_rate: f64,
    /// Total samples published this session
    pub total_samples: u64,
}

/// Shared diagnostics state for one acquisition session
#[derive(Debug)]
pub struct Diagnostics {
    total_samples: Arc<AtomicU64>,
    sample_rate: f64,
    last_total: AtomicU64,
    last_tick: Mutex<Instant>,
    last_report: Mutex<Option<DiagnosticsReport>>,
}

impl Diagnostics {
    pub fn new(total_samples: Arc<AtomicU64>, sample_rate: f64) -> Self {
        Self {
            total_samples,
            sample_rate,
            last_total: AtomicU64::new(0),
            last_tick: Mutex::new(Instant::now()),
            last_report: Mutex::new(None),
        }
    }

    /// Take a report covering the time since the previous one
    pub fn tick(&self) -> DiagnosticsReport {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_tick.lock().unwrap_or_else(|e| e.into_inner());
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };

        let total = self.total_samples.load(Ordering::Relaxed);
        let previous = self.last_total.swap(total, Ordering::Relaxed);
        let actual = total.saturating_sub(previous);
        let expected = (self.sample_rate * elapsed.as_secs_f64()).round() as u64;
        let relative_rate = if expected > 0 {
            actual as f64 / expected as f64
        } else {
            0.0
        };

        let report = DiagnosticsReport {
            timestamp: Utc::now(),
            expected_samples: expected,
            actual_samples: actual,
            relative_rate,
            total_samples: total,
        };

        tracing::debug!(
            expected = report.expected_samples,
            actual = report.actual_samples,
            relative_rate = report.relative_rate,
            "Acquisition diagnostics"
        );

        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
        report
    }

    /// Most recent report, if any
    pub fn last_report(&self) -> Option<DiagnosticsReport> {
        self.last_report.lock().ok().and_then(|r| r.clone())
    }
}

/// Background timer calling [`Diagnostics::tick`] on a fixed period
pub struct DiagnosticsTimer {
    shutdown_tx: Option<crossbeam_channel::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DiagnosticsTimer {
    /// Spawn the timer thread
    pub fn start(diagnostics: Arc<Diagnostics>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(interval);

        let thread = std::thread::Builder::new()
            .name("ephys-diagnostics".into())
            .spawn(move || loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => {
                        diagnostics.tick();
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            })?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Stop the timer and wait for its thread
    pub fn stop(&mut self) {
        // Dropping the sender wakes the select with a disconnect
        self.shutdown_tx.take();
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }
}

impl Drop for DiagnosticsTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_interval_samples() {
        let total = Arc::new(AtomicU64::new(0));
        let diagnostics = Diagnostics::new(Arc::clone(&total), 1000.0);

        total.store(500, Ordering::Relaxed);
        let first = diagnostics.tick();
        assert_eq!(first.actual_samples, 500);
        assert_eq!(first.total_samples, 500);

        total.store(700, Ordering::Relaxed);
        let second = diagnostics.tick();
        assert_eq!(second.actual_samples, 200);
        assert_eq!(diagnostics.last_report(), Some(second));
    }

    #[test]
    fn test_counter_reset_does_not_underflow() {
        let total = Arc::new(AtomicU64::new(100));
        let diagnostics = Diagnostics::new(Arc::clone(&total), 1000.0);
        diagnostics.tick();
        total.store(0, Ordering::Relaxed);
        assert_eq!(diagnostics.tick().actual_samples, 0);
    }

    #[test]
    fn test_timer_produces_reports_and_stops() {
        let total = Arc::new(AtomicU64::new(0));
        let diagnostics = Arc::new(Diagnostics::new(Arc::clone(&total), 1000.0));
        let mut timer =
            DiagnosticsTimer::start(Arc::clone(&diagnostics), Duration::from_millis(10)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while diagnostics.last_report().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        timer.stop();
        assert!(diagnostics.last_report().is_some());
    }
}

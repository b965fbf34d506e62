//! Host status channel
//!
//! Short human-readable status events for the host (e.g. a status bar).
//! Sending never blocks the acquisition worker: when the host is not
//! draining the channel, new events are dropped.

use chrono::{DateTime, Utc};

/// Status channel capacity
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Severity of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// A single status message for the host
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// When the event was raised
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: StatusLevel,
    /// Message text
    pub message: String,
}

/// Sending half of the status channel
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: crossbeam_channel::Sender<StatusEvent>,
}

impl StatusReporter {
    /// Create a reporter and the receiver the host drains
    pub fn channel() -> (Self, crossbeam_channel::Receiver<StatusEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(STATUS_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(StatusLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.send(StatusLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(StatusLevel::Error, message.into());
    }

    fn send(&self, level: StatusLevel, message: String) {
        let event = StatusEvent {
            timestamp: Utc::now(),
            level,
            message,
        };
        if self.tx.try_send(event).is_err() {
            tracing::trace!("Status channel full, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (reporter, rx) = StatusReporter::channel();
        reporter.info("bound");
        reporter.warn("Ephys Socket: Data shape mismatch");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.level, StatusLevel::Info);
        assert_eq!(first.message, "bound");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.level, StatusLevel::Warning);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (reporter, rx) = StatusReporter::channel();
        for i in 0..(STATUS_CHANNEL_CAPACITY + 10) {
            reporter.error(format!("event {}", i));
        }
        assert_eq!(rx.len(), STATUS_CHANNEL_CAPACITY);
        assert_eq!(rx.try_recv().unwrap().message, "event 0");
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (reporter, rx) = StatusReporter::channel();
        drop(rx);
        reporter.info("nobody listening");
    }
}

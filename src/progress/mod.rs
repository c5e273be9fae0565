//! Worker-to-frontend plumbing: the cancellation flag, the event channel
//! payloads, and percent derivation from fetch-collaborator byte counters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::job::Outcome;

/// Cooperative cancellation flag. One writer (the frontend), one reader (the
/// pipeline, polled between phases). Set at most once per job, never reset.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Severity of a log event shown in the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Events emitted by the pipeline worker, drained on the frontend side.
/// Delivered in emission order, exactly as emitted, never on the worker's
/// own initiative touching frontend state.
#[derive(Debug, Clone)]
pub enum Event {
    /// Overall job progress, 0..=100, with a status line.
    Progress { percent: u8, message: String },
    /// A log line for the activity feed.
    Log { kind: LogKind, message: String },
    /// The single terminal record of the job.
    Finished(Outcome),
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<Event>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<Event>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Derives a percentage from the byte counters the fetch collaborator
/// reports. Falls back from the exact total to the estimated total, and to
/// the last known percent when neither is present.
#[derive(Debug, Default)]
pub struct PercentTracker {
    last_percent: u8,
}

impl PercentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        downloaded: Option<u64>,
        total: Option<u64>,
        total_estimate: Option<u64>,
    ) -> u8 {
        let percent = match (downloaded, total, total_estimate) {
            (Some(d), Some(t), _) if t > 0 => ((d as f64 / t as f64) * 100.0) as u8,
            (Some(d), _, Some(t)) if t > 0 => ((d as f64 / t as f64) * 100.0) as u8,
            _ => self.last_percent,
        };
        self.last_percent = percent.min(100);
        self.last_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_stays_set() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
        // Observed from a clone as well
        let other = flag.clone();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_percent_from_exact_total() {
        let mut tracker = PercentTracker::new();
        assert_eq!(tracker.update(Some(50), Some(200), None), 25);
    }

    #[test]
    fn test_percent_from_estimate_when_total_missing() {
        let mut tracker = PercentTracker::new();
        assert_eq!(tracker.update(Some(50), None, Some(100)), 50);
    }

    #[test]
    fn test_percent_keeps_last_known_without_totals() {
        let mut tracker = PercentTracker::new();
        tracker.update(Some(50), Some(100), None);
        assert_eq!(tracker.update(Some(75), None, None), 50);
    }

    #[test]
    fn test_percent_is_clamped() {
        let mut tracker = PercentTracker::new();
        assert_eq!(tracker.update(Some(300), Some(100), None), 100);
    }
}

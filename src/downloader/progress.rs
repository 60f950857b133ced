//! Run-wide progress accounting shared by all download tasks

use std::sync::Mutex;

use crate::models::ErrorKind;

/// A failed attachment and why it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttachment {
    pub id: String,
    pub file_name: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Final counts of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: Vec<FailedAttachment>,
    /// Never dispatched because the run was cancelled
    pub skipped: usize,
    pub bytes_written: u64,
    /// Highest number of attachments in flight at once
    pub peak_in_flight: usize,
}

impl RunSummary {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Every attachment reached a terminal state
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed.len() + self.skipped == self.total
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    total: usize,
    completed: usize,
    failed: Vec<FailedAttachment>,
    skipped: usize,
    bytes_written: u64,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Serialized progress aggregate; every update takes the same lock.
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
}

impl ProgressTracker {
    /// `total` is fixed for the lifetime of the tracker
    pub fn new(total: usize) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                total,
                ..Default::default()
            }),
        }
    }

    /// An attachment entered the owner-resolving..downloading pipeline
    pub fn start(&self) {
        let mut state = self.lock();
        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
    }

    /// Record a finished download and return the new completion percentage
    pub fn record_done(&self, bytes: u64) -> u8 {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.completed + state.failed.len() + state.skipped < state.total {
            state.completed += 1;
        }
        state.bytes_written += bytes;
        percent(state.completed, state.total)
    }

    pub fn record_failure(&self, failure: FailedAttachment) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.failed.push(failure);
    }

    /// An attachment was never dispatched
    pub fn record_skipped(&self) {
        self.lock().skipped += 1;
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn summary(&self) -> RunSummary {
        let state = self.lock();
        RunSummary {
            total: state.total,
            completed: state.completed,
            failed: state.failed.clone(),
            skipped: state.skipped,
            bytes_written: state.bytes_written,
            peak_in_flight: state.peak_in_flight,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// floor(completed / total * 100); an empty run counts as complete
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed.min(total) * 100) / total) as u8
}

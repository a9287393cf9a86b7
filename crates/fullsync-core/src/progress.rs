//! Progress reporting for sync runs.
//!
//! Every step of a run ends with one or more `ProgressEvent`s carrying a
//! message, a status and a snapshot of the run state. Drivers pick a sink:
//! a closure, `LoggingProgress` for tracing output, or `ChannelProgress` to
//! hand events to another thread.

use crate::types::RunState;
use crossbeam_channel::{Receiver, Sender};
use std::fmt;

/// Outcome carried by a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// The reported operation succeeded
    Success,

    /// The reported operation failed; the run continues
    Error,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::Success => write!(f, "success"),
            ProgressStatus::Error => write!(f, "error"),
        }
    }
}

/// A progress message with a snapshot of the run state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Human-readable message
    pub message: String,

    /// Success or error
    pub status: ProgressStatus,

    /// Run state at the time of the event (None once the run is finalized)
    pub state: Option<RunState>,
}

impl ProgressEvent {
    /// Whether this event reports an error
    pub fn is_error(&self) -> bool {
        self.status == ProgressStatus::Error
    }
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    /// Called for every event, in order
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// A sink that logs to tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProgress;

impl ProgressSink for LoggingProgress {
    fn report(&self, event: &ProgressEvent) {
        let (offset, found, queued) = event
            .state
            .as_ref()
            .map(|s| (s.offset, s.found_items, s.queue.len()))
            .unwrap_or_default();

        match event.status {
            ProgressStatus::Success => tracing::info!(
                offset,
                found,
                queued,
                "{}",
                event.message
            ),
            ProgressStatus::Error => tracing::warn!(
                offset,
                found,
                queued,
                "{}",
                event.message
            ),
        }
    }
}

/// A sink that forwards events through a channel
pub struct ChannelProgress {
    sender: Sender<ProgressEvent>,
}

impl ChannelProgress {
    /// Create a new channel sink and its receiver
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (ChannelProgress { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: &ProgressEvent) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.sender.send(event.clone());
    }
}

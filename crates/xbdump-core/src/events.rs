//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow a dump without the core
//! printing anything itself.

use std::fmt;
use std::path::PathBuf;

use crate::probe::RestrictedState;
use crate::query::QueryKey;

/// Dump dispatcher phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpPhase {
    /// Inspecting the request (help short-circuit).
    ParsingOptions,
    /// Turning the device selector into a device handle.
    ResolvingDevice,
    /// Checking the destination path.
    ValidatingOutput,
    /// Choosing the dump type.
    Dispatching,
    /// Streaming the flash image.
    FlashDump,
    /// Building and writing the configuration snapshot.
    ConfigDump,
    /// Finished successfully.
    Done,
    /// Terminated with an error.
    Aborted,
}

impl fmt::Display for DumpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpPhase::ParsingOptions => write!(f, "Parsing Options"),
            DumpPhase::ResolvingDevice => write!(f, "Resolving Device"),
            DumpPhase::ValidatingOutput => write!(f, "Validating Output"),
            DumpPhase::Dispatching => write!(f, "Dispatching"),
            DumpPhase::FlashDump => write!(f, "Flash Dump"),
            DumpPhase::ConfigDump => write!(f, "Config Dump"),
            DumpPhase::Done => write!(f, "Done"),
            DumpPhase::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Events emitted while a dump runs.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpEvent {
    /// Phase changed.
    PhaseChanged { from: DumpPhase, to: DumpPhase },
    /// Device selector resolved.
    DeviceResolved { index: u32, bdf: String },
    /// Device runs a restricted image; scaling fields are skipped.
    Restricted { state: RestrictedState },
    /// Optional field left out of the snapshot.
    FieldSkipped { key: QueryKey, reason: String },
    /// Byte progress of the flash stream.
    Progress { current: u64, total: Option<u64> },
    /// Output written.
    Complete { path: PathBuf },
}

/// Observer trait for receiving dump events.
pub trait DumpObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DumpEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DumpObserver for NullObserver {
    fn on_event(&self, _event: &DumpEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DumpObserver for TracingObserver {
    fn on_event(&self, event: &DumpEvent) {
        match event {
            DumpEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            DumpEvent::DeviceResolved { index, bdf } => {
                tracing::info!(index = index, bdf = %bdf, "Device resolved");
            }
            DumpEvent::Restricted { state } => {
                tracing::info!("This operation is not supported with {} image", state);
            }
            DumpEvent::FieldSkipped { key, reason } => {
                tracing::debug!(key = %key, reason = %reason, "Field skipped");
            }
            DumpEvent::Progress { current, total } => match total {
                Some(total) if *total > 0 => {
                    let pct = (*current * 100) / *total;
                    tracing::debug!(progress = %format!("{}%", pct), "Reading flash");
                }
                _ => tracing::debug!(bytes = current, "Reading flash"),
            },
            DumpEvent::Complete { path } => {
                tracing::info!(path = %path.display(), "Dump complete");
            }
        }
    }
}

/// Observer that keeps every event, for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: std::sync::Mutex<Vec<DumpEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<DumpEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn phases(&self) -> Vec<DumpPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DumpEvent::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl DumpObserver for RecordingObserver {
    fn on_event(&self, event: &DumpEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

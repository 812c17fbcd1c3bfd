//! Dump dispatcher - top-level orchestration of one dump request.
//!
//! ```text
//! ParsingOptions -> ResolvingDevice -> ValidatingOutput -> Dispatching
//!     -> FlashDump | ConfigDump -> Done
//! ```
//!
//! Any step may end in `Aborted`. A help request ends in `Done` right after
//! `ParsingOptions` without touching a device.

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use crate::backend::DeviceBackend;
use crate::error::DumpError;
use crate::events::{DumpEvent, DumpObserver, DumpPhase};
use crate::output::resolved;
use crate::query::DeviceQuery;
use crate::{flash, guard, resolve, snapshot};

/// What to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// Raw flash image.
    Flash,
    /// Configuration snapshot.
    Config,
}

/// A dump request as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpRequest {
    /// Device selector; `None` picks the only device present.
    pub device: Option<String>,
    /// Destination file.
    pub output: PathBuf,
    /// `--flash` given.
    pub flash: bool,
    /// `--config` given.
    pub config: bool,
    /// Overwrite an existing destination.
    pub force: bool,
    /// `--help` given.
    pub help: bool,
}

impl DumpRequest {
    /// Selected dump mode.
    ///
    /// Flash wins when both flags are set, matching the order in which the
    /// flags have always been checked.
    pub fn mode(&self) -> Option<DumpMode> {
        if self.flash {
            Some(DumpMode::Flash)
        } else if self.config {
            Some(DumpMode::Config)
        } else {
            None
        }
    }
}

/// Successful end of a dump request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpOutcome {
    /// Help was requested; nothing was dumped.
    HelpRequested,
    /// Flash image written.
    Flash { path: PathBuf, bytes: u64 },
    /// Configuration snapshot written.
    Config { path: PathBuf, keys: usize },
}

struct PhaseTracker<'a, O: ?Sized> {
    current: DumpPhase,
    observer: &'a O,
}

impl<O: DumpObserver + ?Sized> PhaseTracker<'_, O> {
    fn enter(&mut self, to: DumpPhase) {
        self.observer.on_event(&DumpEvent::PhaseChanged {
            from: self.current,
            to,
        });
        self.current = to;
    }
}

/// Run one dump request to completion.
#[instrument(skip(backend, observer), fields(output = %request.output.display()))]
pub fn dispatch<B, O>(backend: &B, request: &DumpRequest, observer: &O) -> Result<DumpOutcome, DumpError>
where
    B: DeviceBackend + ?Sized,
    O: DumpObserver + ?Sized,
{
    let mut phases = PhaseTracker {
        current: DumpPhase::ParsingOptions,
        observer,
    };

    let result = run(backend, request, observer, &mut phases);
    match &result {
        Ok(_) => phases.enter(DumpPhase::Done),
        Err(e) => {
            debug!(phase = %phases.current, error = %e, "Dump aborted");
            phases.enter(DumpPhase::Aborted);
        }
    }
    result
}

fn run<B, O>(
    backend: &B,
    request: &DumpRequest,
    observer: &O,
    phases: &mut PhaseTracker<'_, O>,
) -> Result<DumpOutcome, DumpError>
where
    B: DeviceBackend + ?Sized,
    O: DumpObserver + ?Sized,
{
    if request.help {
        return Ok(DumpOutcome::HelpRequested);
    }

    phases.enter(DumpPhase::ResolvingDevice);
    let device = resolve::resolve_device(backend, request.device.as_deref())?;
    observer.on_event(&DumpEvent::DeviceResolved {
        index: device.index(),
        bdf: device.bdf().to_string(),
    });

    phases.enter(DumpPhase::ValidatingOutput);
    guard::validate(&request.output, request.force)?;

    phases.enter(DumpPhase::Dispatching);
    let mode = request.mode().ok_or(DumpError::NoDumpMode)?;
    info!(?mode, bdf = %device.bdf(), "Dumping");

    let outcome = match mode {
        DumpMode::Flash => {
            phases.enter(DumpPhase::FlashDump);
            let bytes = flash::extract(backend, device.index(), &request.output, request.force, observer)?;
            DumpOutcome::Flash {
                path: resolved(&request.output),
                bytes,
            }
        }
        DumpMode::Config => {
            phases.enter(DumpPhase::ConfigDump);
            let snapshot = snapshot::build(&device, observer)?;
            snapshot::serialize(&snapshot, &request.output, request.force)?;
            DumpOutcome::Config {
                path: resolved(&request.output),
                keys: snapshot.len(),
            }
        }
    };

    observer.on_event(&DumpEvent::Complete {
        path: request.output.clone(),
    });
    Ok(outcome)
}

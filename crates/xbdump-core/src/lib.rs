//! xbdump-core: device-state dump engine for accelerator cards.
//!
//! Extracts either the raw flash image or a configuration snapshot from an
//! accelerator device, never overwriting an existing file unless forced and
//! tolerating optional features the device firmware does not provide.
//!
//! # Architecture
//!
//! - **Query**: typed device queries and the `DeviceQuery` trait
//! - **Backend**: device enumeration and access (sysfs, mock)
//! - **Resolve**: device selector handling
//! - **Guard**: output destination checks
//! - **Probe**: optional capability probing (restricted images, chip family)
//! - **Snapshot**: configuration snapshot building and encoding
//! - **Flash**: flash image extraction
//! - **Dispatch**: top-level orchestrator
//! - **Events**: observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use xbdump_core::{DumpRequest, Settings, SysfsBackend, TracingObserver, dispatch};
//!
//! let backend = SysfsBackend::from_settings(&Settings::default());
//! let request = DumpRequest {
//!     device: Some("0000:d8:00.0".to_string()),
//!     output: PathBuf::from("config.ini"),
//!     config: true,
//!     ..Default::default()
//! };
//!
//! dispatch(&backend, &request, &TracingObserver).expect("dump failed");
//! ```

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod flash;
pub mod guard;
mod output;
pub mod probe;
pub mod query;
pub mod resolve;
pub mod settings;
pub mod snapshot;

// Re-exports for convenience
pub use backend::{
    DeviceBackend, DeviceInfo, FlashChannel, MockBackend, MockDevice, ResolveError, SysfsBackend,
};
pub use dispatch::{DumpMode, DumpOutcome, DumpRequest, dispatch};
pub use error::{DumpError, EXIT_CANCELED};
pub use events::{DumpEvent, DumpObserver, DumpPhase, NullObserver, TracingObserver};
pub use flash::FlashError;
pub use guard::GuardError;
pub use probe::{ArchitectureVariant, Probe, RestrictedState};
pub use query::{DeviceQuery, QueryError, QueryKey, QueryValue};
pub use settings::{Settings, SettingsError};
pub use snapshot::{ConfigSnapshot, SnapshotError, SnapshotValue};

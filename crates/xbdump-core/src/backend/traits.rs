//! Device backend abstraction.
//!
//! Defines the `DeviceBackend` trait for enumerating accelerator devices,
//! opening query handles and flash read channels, allowing different
//! implementations (sysfs, mock, etc.).

use std::fmt;
use std::io::Read;

use thiserror::Error;

use crate::query::DeviceQuery;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No supported devices found")]
    NoDevices,

    #[error("Device not found: '{selector}'")]
    NotFound { selector: String },

    #[error("Multiple devices found, use --device to choose one of: {}", .candidates.join(", "))]
    Ambiguous { candidates: Vec<String> },

    #[error("Invalid device selector: '{0}'")]
    InvalidSelector(String),

    #[error("Failed to open device {bdf}: {message}")]
    OpenFailed { bdf: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Enumerated device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Ordinal index in enumeration order.
    pub index: u32,
    /// Normalized PCI address (`dddd:bb:dd.f`, lowercase).
    pub bdf: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.bdf)
    }
}

/// Raw flash read channel.
///
/// Yields the device's persistent image as a byte stream.
pub trait FlashChannel: Read {
    /// Total image size in bytes, when the device reports one.
    fn size_hint(&self) -> Option<u64>;
}

/// Abstract device backend.
///
/// This trait enables:
/// - Production implementation over sysfs and device nodes
/// - Mock implementation for unit testing
pub trait DeviceBackend {
    type Device: DeviceQuery;

    /// List devices in index order.
    fn devices(&self) -> Result<Vec<DeviceInfo>, ResolveError>;

    /// Open a query handle for an enumerated device.
    fn open(&self, info: &DeviceInfo) -> Result<Self::Device, ResolveError>;

    /// Open the flash read channel of the device with the given index.
    ///
    /// Returns `None` if no flash-capable handle exists for that index.
    fn open_flash(&self, index: u32) -> Option<Box<dyn FlashChannel + '_>>;
}

//! Device backend layer.

pub mod mock;
pub mod sysfs;
pub mod traits;

pub use mock::{MockBackend, MockDevice};
pub use sysfs::{SysfsBackend, SysfsDevice};
pub use traits::{DeviceBackend, DeviceInfo, FlashChannel, ResolveError};

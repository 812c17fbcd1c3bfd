//! sysfs-based device backend.
//!
//! Devices are PCI functions under `<sysfs_root>/bus/pci/devices` whose
//! `vendor` attribute matches one of the configured vendor ids. Each query
//! reads one attribute file named after [`QueryKey::name`]. Flash images are
//! read from the `<dev_root>/xfpga/flash.m<index>` character device.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use super::traits::{DeviceBackend, DeviceInfo, FlashChannel, ResolveError};
use crate::query::{DeviceQuery, QueryError, QueryKey, QueryValue};
use crate::settings::Settings;

/// sysfs-based backend.
#[derive(Debug, Clone)]
pub struct SysfsBackend {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    vendor_ids: Vec<u16>,
}

impl SysfsBackend {
    pub fn new(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>, vendor_ids: Vec<u16>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
            vendor_ids,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.sysfs_root,
            &settings.dev_root,
            settings.vendor_ids.clone(),
        )
    }

    fn pci_devices_dir(&self) -> PathBuf {
        self.sysfs_root.join("bus").join("pci").join("devices")
    }

    fn flash_node(&self, index: u32) -> PathBuf {
        self.dev_root.join("xfpga").join(format!("flash.m{}", index))
    }

    fn vendor_matches(&self, dir: &Path) -> bool {
        let Ok(text) = fs::read_to_string(dir.join("vendor")) else {
            return false;
        };
        match parse_attr(&text) {
            Some(QueryValue::Int(vid)) => self.vendor_ids.iter().any(|&v| u64::from(v) == vid),
            _ => false,
        }
    }
}

impl DeviceBackend for SysfsBackend {
    type Device = SysfsDevice;

    #[instrument(level = "debug", skip(self), fields(root = %self.sysfs_root.display()))]
    fn devices(&self) -> Result<Vec<DeviceInfo>, ResolveError> {
        let entries = match fs::read_dir(self.pci_devices_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("PCI device directory missing, no devices to enumerate");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut bdfs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if self.vendor_matches(&entry.path()) {
                bdfs.push(entry.file_name().to_string_lossy().to_lowercase());
            }
        }
        bdfs.sort();

        debug!(count = bdfs.len(), "Enumerated devices");
        Ok(bdfs
            .into_iter()
            .enumerate()
            .map(|(i, bdf)| DeviceInfo {
                index: i as u32,
                bdf,
            })
            .collect())
    }

    fn open(&self, info: &DeviceInfo) -> Result<SysfsDevice, ResolveError> {
        let path = self.pci_devices_dir().join(&info.bdf);
        if !path.is_dir() {
            return Err(ResolveError::OpenFailed {
                bdf: info.bdf.clone(),
                message: format!("{} is not a directory", path.display()),
            });
        }
        Ok(SysfsDevice {
            index: info.index,
            bdf: info.bdf.clone(),
            path,
        })
    }

    fn open_flash(&self, index: u32) -> Option<Box<dyn FlashChannel + '_>> {
        let node = self.flash_node(index);
        match File::open(&node) {
            Ok(file) => {
                // Character devices report a zero length.
                let size = file
                    .metadata()
                    .ok()
                    .filter(|m| m.is_file() && m.len() > 0)
                    .map(|m| m.len());
                debug!(node = %node.display(), ?size, "Opened flash node");
                Some(Box::new(NodeFlash { file, size }))
            }
            Err(e) => {
                debug!(node = %node.display(), error = %e, "Flash node unavailable");
                None
            }
        }
    }
}

/// Query handle for one PCI function.
#[derive(Debug, Clone)]
pub struct SysfsDevice {
    index: u32,
    bdf: String,
    path: PathBuf,
}

impl DeviceQuery for SysfsDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn bdf(&self) -> &str {
        &self.bdf
    }

    fn query(&self, key: QueryKey) -> Result<QueryValue, QueryError> {
        let text = match fs::read_to_string(self.path.join(key.name())) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(QueryError::Unsupported { key });
            }
            Err(e) => {
                return Err(QueryError::Failed {
                    key,
                    message: e.to_string(),
                });
            }
        };
        parse_attr(&text).ok_or_else(|| QueryError::Failed {
            key,
            message: format!("unparsable value '{}'", text.trim()),
        })
    }
}

struct NodeFlash {
    file: File,
    size: Option<u64>,
}

impl Read for NodeFlash {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl FlashChannel for NodeFlash {
    fn size_hint(&self) -> Option<u64> {
        self.size
    }
}

/// Parse a sysfs attribute: `0x`-prefixed hex, decimal, or `true`/`false`.
fn parse_attr(text: &str) -> Option<QueryValue> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(QueryValue::Int);
    }
    match text {
        "true" => Some(QueryValue::Bool(true)),
        "false" => Some(QueryValue::Bool(false)),
        _ => text.parse::<u64>().ok().map(QueryValue::Int),
    }
}

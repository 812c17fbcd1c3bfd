//! Tool settings loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to encode settings: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Settings for the dump tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the sysfs tree.
    pub sysfs_root: PathBuf,
    /// Root of the device node tree.
    pub dev_root: PathBuf,
    /// Allow overwriting existing output files.
    pub force: bool,
    /// PCI vendor ids of supported devices.
    pub vendor_ids: Vec<u16>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            force: false,
            // Xilinx, AMD
            vendor_ids: vec![0x10ee, 0x1022],
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

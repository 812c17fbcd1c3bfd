//! Configuration snapshot.
//!
//! A snapshot is an ordered set of scalar settings under a single `[Device]`
//! section:
//!
//! ```text
//! [Device]
//! mailbox_channel_disable = 32
//! mailbox_channel_switch = 0
//! xclbin_change = 1
//! cache_xclbin = 0
//! scaling_enabled = 1
//! scaling_power_override = 0
//! scaling_temp_override = 85
//! ```
//!
//! The four baseline keys are always present. The three `scaling_*` keys
//! are only attempted on unrestricted devices, each one independently.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use toml::{Table, Value};
use tracing::{debug, info, instrument};

use crate::events::{DumpEvent, DumpObserver};
use crate::output::write_atomically;
use crate::probe::{Probe, probe_architecture_variant, probe_restricted_state};
use crate::query::{DeviceQuery, QueryError, QueryKey, QueryValue};

/// Section holding all device settings.
pub const DEVICE_SECTION: &str = "Device";

pub const MAILBOX_CHANNEL_DISABLE: &str = "mailbox_channel_disable";
pub const MAILBOX_CHANNEL_SWITCH: &str = "mailbox_channel_switch";
pub const XCLBIN_CHANGE: &str = "xclbin_change";
pub const CACHE_XCLBIN: &str = "cache_xclbin";
pub const SCALING_ENABLED: &str = "scaling_enabled";
pub const SCALING_POWER_OVERRIDE: &str = "scaling_power_override";
pub const SCALING_TEMP_OVERRIDE: &str = "scaling_temp_override";

/// Baseline keys and the queries answering them.
const MANDATORY: [(&str, QueryKey); 4] = [
    (MAILBOX_CHANNEL_DISABLE, QueryKey::ConfigMailboxChannelDisable),
    (MAILBOX_CHANNEL_SWITCH, QueryKey::ConfigMailboxChannelSwitch),
    (XCLBIN_CHANGE, QueryKey::ConfigXclbinChange),
    (CACHE_XCLBIN, QueryKey::CacheXclbin),
];

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("Failed to parse snapshot: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Section [{0}] not found")]
    MissingSection(String),
    #[error("Key '{key}' has an unsupported value")]
    InvalidValue { key: String },
}

/// Scalar snapshot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotValue {
    Int(u64),
    Bool(bool),
}

impl fmt::Display for SnapshotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotValue::Int(v) => write!(f, "{}", v),
            SnapshotValue::Bool(b) => write!(f, "{}", u8::from(*b)),
        }
    }
}

impl From<QueryValue> for SnapshotValue {
    fn from(value: QueryValue) -> Self {
        match value {
            QueryValue::Int(v) => SnapshotValue::Int(v),
            QueryValue::Bool(b) => SnapshotValue::Bool(b),
        }
    }
}

impl SnapshotValue {
    fn to_toml(self, key: &str) -> Result<Value, SnapshotError> {
        let v = match self {
            SnapshotValue::Int(v) => {
                i64::try_from(v).map_err(|_| SnapshotError::InvalidValue { key: key.into() })?
            }
            SnapshotValue::Bool(b) => i64::from(b),
        };
        Ok(Value::Integer(v))
    }

    fn from_toml(key: &str, value: &Value) -> Result<Self, SnapshotError> {
        match value {
            Value::Integer(v) => u64::try_from(*v)
                .map(SnapshotValue::Int)
                .map_err(|_| SnapshotError::InvalidValue { key: key.into() }),
            Value::Boolean(b) => Ok(SnapshotValue::Bool(*b)),
            _ => Err(SnapshotError::InvalidValue { key: key.into() }),
        }
    }
}

/// Ordered key/value settings under one named section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    section: String,
    entries: Vec<(String, SnapshotValue)>,
}

impl ConfigSnapshot {
    pub fn new(section: &str) -> Self {
        Self {
            section: section.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    /// Insert or replace `key`, keeping first-insertion order.
    pub fn insert(&mut self, key: &str, value: SnapshotValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<SnapshotValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SnapshotValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode as section-based `key = value` text.
    pub fn to_text(&self) -> Result<String, SnapshotError> {
        let mut section = Table::new();
        for (key, value) in self.iter() {
            section.insert(key.to_string(), value.to_toml(key)?);
        }
        let mut root = Table::new();
        root.insert(self.section.clone(), Value::Table(section));
        Ok(toml::to_string(&root)?)
    }

    /// Parse text produced by [`ConfigSnapshot::to_text`].
    pub fn from_text(text: &str, section: &str) -> Result<Self, SnapshotError> {
        let root: Table = toml::from_str(text)?;
        let table = root
            .get(section)
            .and_then(Value::as_table)
            .ok_or_else(|| SnapshotError::MissingSection(section.to_string()))?;

        let mut snapshot = Self::new(section);
        for (key, value) in table {
            snapshot.insert(key, SnapshotValue::from_toml(key, value)?);
        }
        Ok(snapshot)
    }

    /// Load a previously dumped `[Device]` snapshot.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text, DEVICE_SECTION)
    }
}

/// Read the device configuration.
///
/// Fails only if one of the baseline keys cannot be read. Optional scaling
/// keys that cannot be read are left out and reported as
/// [`DumpEvent::FieldSkipped`].
#[instrument(level = "debug", skip_all, fields(bdf = %device.bdf()))]
pub fn build<D, O>(device: &D, observer: &O) -> Result<ConfigSnapshot, QueryError>
where
    D: DeviceQuery + ?Sized,
    O: DumpObserver + ?Sized,
{
    let mut snapshot = ConfigSnapshot::new(DEVICE_SECTION);
    for (name, key) in MANDATORY {
        snapshot.insert(name, mandatory_value(device, key)?);
    }

    if probe_restricted_state(device, observer).is_restricted() {
        return Ok(snapshot);
    }

    let scaling = probe_architecture_variant(device).scaling(device);
    debug!(variant = ?scaling.variant(), "Reading scaling controls");

    let optional = [
        (
            SCALING_ENABLED,
            scaling.enabled_key(),
            scaling.enabled().map(SnapshotValue::Bool),
        ),
        (
            SCALING_POWER_OVERRIDE,
            scaling.power_override_key(),
            scaling.power_override().map(|v| SnapshotValue::Int(v.into())),
        ),
        (
            SCALING_TEMP_OVERRIDE,
            scaling.temp_override_key(),
            scaling.temp_override().map(|v| SnapshotValue::Int(v.into())),
        ),
    ];
    for (name, key, probe) in optional {
        match probe {
            Probe::Answered(value) => snapshot.insert(name, value),
            Probe::Unsupported(e) => observer.on_event(&DumpEvent::FieldSkipped {
                key,
                reason: e.to_string(),
            }),
        }
    }

    Ok(snapshot)
}

/// Baseline keys hold either a flag or a 32-bit register value.
fn mandatory_value<D: DeviceQuery + ?Sized>(device: &D, key: QueryKey) -> Result<SnapshotValue, QueryError> {
    match device.query(key)? {
        QueryValue::Bool(b) => Ok(SnapshotValue::Bool(b)),
        QueryValue::Int(value) => u32::try_from(value)
            .map(|v| SnapshotValue::Int(v.into()))
            .map_err(|_| QueryError::OutOfRange { key, value }),
    }
}

/// Write `snapshot` to `path`, replacing it only once fully written.
///
/// Without `overwrite`, a file that appeared at `path` in the meantime is
/// left alone and the write fails.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn serialize(snapshot: &ConfigSnapshot, path: &Path, overwrite: bool) -> Result<(), SnapshotError> {
    let text = snapshot.to_text()?;
    write_atomically(path, overwrite, |w| w.write_all(text.as_bytes()))?;
    info!(keys = snapshot.len(), path = %path.display(), "Config snapshot written");
    Ok(())
}

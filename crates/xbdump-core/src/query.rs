//! Typed device queries.
//!
//! Every piece of device state the dump tool reads is addressed by a
//! [`QueryKey`]. Backends answer with a [`QueryValue`] or a [`QueryError`];
//! `Unsupported` is the normal answer for features a firmware variant
//! does not carry.

use std::fmt;

use thiserror::Error;

/// Device state that can be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// Bitmask of disabled mailbox channels.
    ConfigMailboxChannelDisable,
    /// Bitmask of mailbox channels switched to software.
    ConfigMailboxChannelSwitch,
    /// Whether the loaded xclbin may be changed.
    ConfigXclbinChange,
    /// Whether xclbin caching is enabled.
    CacheXclbin,
    /// Device is running a manufacturing image.
    IsMfg,
    /// Device is running a recovery image.
    IsRecovery,
    /// Device belongs to the Versal architecture family.
    IsVersal,
    XmcScalingEnabled,
    XmcScalingPowerOverride,
    XmcScalingTempOverride,
    XgqScalingEnabled,
    XgqScalingPowerOverride,
    XgqScalingTempOverride,
}

impl QueryKey {
    /// Stable attribute name, also used as the sysfs node name.
    pub fn name(&self) -> &'static str {
        match self {
            QueryKey::ConfigMailboxChannelDisable => "config_mailbox_channel_disable",
            QueryKey::ConfigMailboxChannelSwitch => "config_mailbox_channel_switch",
            QueryKey::ConfigXclbinChange => "config_xclbin_change",
            QueryKey::CacheXclbin => "cache_xclbin",
            QueryKey::IsMfg => "mfg",
            QueryKey::IsRecovery => "recovery",
            QueryKey::IsVersal => "versal",
            QueryKey::XmcScalingEnabled => "xmc_scaling_enabled",
            QueryKey::XmcScalingPowerOverride => "xmc_scaling_power_override",
            QueryKey::XmcScalingTempOverride => "xmc_scaling_temp_override",
            QueryKey::XgqScalingEnabled => "xgq_scaling_enabled",
            QueryKey::XgqScalingPowerOverride => "xgq_scaling_power_override",
            QueryKey::XgqScalingTempOverride => "xgq_scaling_temp_override",
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar answer to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryValue {
    Bool(bool),
    Int(u64),
}

impl QueryValue {
    /// Interpret as a boolean; integers are true when non-zero.
    pub fn as_bool(&self) -> bool {
        match self {
            QueryValue::Bool(b) => *b,
            QueryValue::Int(v) => *v != 0,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            QueryValue::Int(v) => Some(*v),
            QueryValue::Bool(_) => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query '{key}' is not supported by this device")]
    Unsupported { key: QueryKey },

    #[error("query '{key}' failed: {message}")]
    Failed { key: QueryKey, message: String },

    #[error("query '{key}' returned {found}, expected {expected}")]
    TypeMismatch {
        key: QueryKey,
        expected: &'static str,
        found: String,
    },

    #[error("query '{key}' returned {value}, which does not fit in 32 bits")]
    OutOfRange { key: QueryKey, value: u64 },
}

impl QueryError {
    pub fn key(&self) -> QueryKey {
        match self {
            QueryError::Unsupported { key }
            | QueryError::Failed { key, .. }
            | QueryError::TypeMismatch { key, .. }
            | QueryError::OutOfRange { key, .. } => *key,
        }
    }
}

/// Device that answers typed queries.
///
/// Implemented by the sysfs backend for real hardware and by
/// [`MockDevice`](crate::backend::MockDevice) for tests.
pub trait DeviceQuery {
    /// Ordinal index of the device in enumeration order.
    fn index(&self) -> u32;

    /// PCI address (`dddd:bb:dd.f`).
    fn bdf(&self) -> &str;

    /// Issue a single query.
    fn query(&self, key: QueryKey) -> Result<QueryValue, QueryError>;
}

/// Query a key expected to hold a boolean.
pub fn query_bool<D: DeviceQuery + ?Sized>(device: &D, key: QueryKey) -> Result<bool, QueryError> {
    device.query(key).map(|v| v.as_bool())
}

/// Query a key expected to hold an integer.
pub fn query_u64<D: DeviceQuery + ?Sized>(device: &D, key: QueryKey) -> Result<u64, QueryError> {
    let value = device.query(key)?;
    value.as_u64().ok_or(QueryError::TypeMismatch {
        key,
        expected: "integer",
        found: format!("{:?}", value),
    })
}

/// Query a 32-bit register value.
///
/// Configuration and scaling attributes are 32-bit on every supported
/// device; wider answers are rejected rather than truncated.
pub fn query_u32<D: DeviceQuery + ?Sized>(device: &D, key: QueryKey) -> Result<u32, QueryError> {
    let value = query_u64(device, key)?;
    u32::try_from(value).map_err(|_| QueryError::OutOfRange { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDevice;

    #[test]
    fn test_key_names_are_unique() {
        let keys = [
            QueryKey::ConfigMailboxChannelDisable,
            QueryKey::ConfigMailboxChannelSwitch,
            QueryKey::ConfigXclbinChange,
            QueryKey::CacheXclbin,
            QueryKey::IsMfg,
            QueryKey::IsRecovery,
            QueryKey::IsVersal,
            QueryKey::XmcScalingEnabled,
            QueryKey::XmcScalingPowerOverride,
            QueryKey::XmcScalingTempOverride,
            QueryKey::XgqScalingEnabled,
            QueryKey::XgqScalingPowerOverride,
            QueryKey::XgqScalingTempOverride,
        ];
        let mut names: Vec<_> = keys.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), keys.len());
    }

    #[test]
    fn test_query_bool_accepts_integers() {
        let dev = MockDevice::new(0, "0000:01:00.0").with(QueryKey::IsMfg, QueryValue::Int(1));
        assert!(query_bool(&dev, QueryKey::IsMfg).unwrap());
    }

    #[test]
    fn test_query_u64_rejects_bool() {
        let dev = MockDevice::new(0, "0000:01:00.0")
            .with(QueryKey::CacheXclbin, QueryValue::Bool(true));
        let err = query_u64(&dev, QueryKey::CacheXclbin).unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { .. }));
        assert_eq!(err.key(), QueryKey::CacheXclbin);
    }

    #[test]
    fn test_missing_key_is_unsupported() {
        let dev = MockDevice::new(0, "0000:01:00.0");
        assert_eq!(
            query_u64(&dev, QueryKey::IsVersal),
            Err(QueryError::Unsupported {
                key: QueryKey::IsVersal
            })
        );
    }

    #[test]
    fn test_query_u32_rejects_wide_values() {
        let dev = MockDevice::new(0, "0000:01:00.0")
            .with(QueryKey::XmcScalingTempOverride, QueryValue::Int(85))
            .with(QueryKey::XmcScalingPowerOverride, QueryValue::Int(u64::MAX));

        assert_eq!(query_u32(&dev, QueryKey::XmcScalingTempOverride), Ok(85));
        assert_eq!(
            query_u32(&dev, QueryKey::XmcScalingPowerOverride),
            Err(QueryError::OutOfRange {
                key: QueryKey::XmcScalingPowerOverride,
                value: u64::MAX
            })
        );
    }
}

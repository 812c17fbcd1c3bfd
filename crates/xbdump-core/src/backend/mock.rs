//! Mock device backend for testing.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use super::traits::{DeviceBackend, DeviceInfo, FlashChannel, ResolveError};
use crate::query::{DeviceQuery, QueryError, QueryKey, QueryValue};

/// Mock device answering scripted queries.
///
/// Keys without a scripted answer report `Unsupported`.
#[derive(Debug, Clone)]
pub struct MockDevice {
    index: u32,
    bdf: String,
    answers: HashMap<QueryKey, Result<QueryValue, QueryError>>,
    /// Captured queries, shared between clones.
    query_log: Arc<Mutex<Vec<QueryKey>>>,
}

impl MockDevice {
    pub fn new(index: u32, bdf: &str) -> Self {
        Self {
            index,
            bdf: bdf.to_string(),
            answers: HashMap::new(),
            query_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script a successful answer.
    pub fn with(mut self, key: QueryKey, value: QueryValue) -> Self {
        self.answers.insert(key, Ok(value));
        self
    }

    /// Script a failing answer.
    pub fn failing(mut self, key: QueryKey, message: &str) -> Self {
        self.answers.insert(
            key,
            Err(QueryError::Failed {
                key,
                message: message.to_string(),
            }),
        );
        self
    }

    /// Script the four baseline configuration values.
    pub fn with_config(self, disable: u64, switch: u64, xclbin_change: u64, cache: u64) -> Self {
        self.with(QueryKey::ConfigMailboxChannelDisable, QueryValue::Int(disable))
            .with(QueryKey::ConfigMailboxChannelSwitch, QueryValue::Int(switch))
            .with(QueryKey::ConfigXclbinChange, QueryValue::Int(xclbin_change))
            .with(QueryKey::CacheXclbin, QueryValue::Int(cache))
    }

    /// Get all captured queries.
    pub fn queries(&self) -> Vec<QueryKey> {
        self.query_log.lock().unwrap().clone()
    }
}

impl DeviceQuery for MockDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn bdf(&self) -> &str {
        &self.bdf
    }

    fn query(&self, key: QueryKey) -> Result<QueryValue, QueryError> {
        self.query_log.lock().unwrap().push(key);
        self.answers
            .get(&key)
            .cloned()
            .unwrap_or(Err(QueryError::Unsupported { key }))
    }
}

#[derive(Debug, Clone)]
struct MockFlash {
    image: Vec<u8>,
    advertise_size: bool,
    /// Offset and message of an injected read failure.
    fail_at: Option<(usize, String)>,
}

/// Mock backend holding devices and flash images in memory.
#[derive(Debug, Default, Clone)]
pub struct MockBackend {
    devices: Vec<MockDevice>,
    flash: HashMap<u32, MockFlash>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Attach a readable flash image to the device with `index`.
    pub fn with_flash(mut self, index: u32, image: &[u8]) -> Self {
        self.flash.insert(
            index,
            MockFlash {
                image: image.to_vec(),
                advertise_size: true,
                fail_at: None,
            },
        );
        self
    }

    /// Attach a flash image whose read fails once `offset` bytes were read.
    pub fn with_failing_flash(mut self, index: u32, image: &[u8], offset: usize, message: &str) -> Self {
        self.flash.insert(
            index,
            MockFlash {
                image: image.to_vec(),
                advertise_size: false,
                fail_at: Some((offset, message.to_string())),
            },
        );
        self
    }

    /// Captured queries for the device at `index`.
    pub fn queries(&self, index: u32) -> Vec<QueryKey> {
        self.devices
            .iter()
            .find(|d| d.index == index)
            .map(|d| d.queries())
            .unwrap_or_default()
    }
}

impl DeviceBackend for MockBackend {
    type Device = MockDevice;

    fn devices(&self) -> Result<Vec<DeviceInfo>, ResolveError> {
        Ok(self
            .devices
            .iter()
            .map(|d| DeviceInfo {
                index: d.index,
                bdf: d.bdf.clone(),
            })
            .collect())
    }

    fn open(&self, info: &DeviceInfo) -> Result<MockDevice, ResolveError> {
        self.devices
            .iter()
            .find(|d| d.index == info.index)
            .cloned()
            .ok_or_else(|| ResolveError::OpenFailed {
                bdf: info.bdf.clone(),
                message: "not present".into(),
            })
    }

    fn open_flash(&self, index: u32) -> Option<Box<dyn FlashChannel + '_>> {
        let flash = self.flash.get(&index)?;
        Some(Box::new(MockFlashChannel { flash, pos: 0 }))
    }
}

struct MockFlashChannel<'a> {
    flash: &'a MockFlash,
    pos: usize,
}

impl Read for MockFlashChannel<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut end = self.flash.image.len();
        if let Some((offset, message)) = &self.flash.fail_at {
            if self.pos >= *offset {
                return Err(io::Error::other(message.clone()));
            }
            end = end.min(*offset);
        }
        let n = buf.len().min(end - self.pos);
        buf[..n].copy_from_slice(&self.flash.image[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl FlashChannel for MockFlashChannel<'_> {
    fn size_hint(&self) -> Option<u64> {
        self.flash
            .advertise_size
            .then_some(self.flash.image.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_query_capture() {
        let dev = MockDevice::new(0, "0000:01:00.0").with(QueryKey::IsMfg, QueryValue::Bool(false));
        let clone = dev.clone();
        dev.query(QueryKey::IsMfg).unwrap();
        assert!(dev.query(QueryKey::IsRecovery).is_err());

        assert_eq!(clone.queries(), vec![QueryKey::IsMfg, QueryKey::IsRecovery]);
    }

    #[test]
    fn test_mock_failing_answer() {
        let dev = MockDevice::new(0, "0000:01:00.0").failing(QueryKey::IsVersal, "bus error");
        let err = dev.query(QueryKey::IsVersal).unwrap_err();
        assert!(err.to_string().contains("bus error"));
    }

    #[test]
    fn test_mock_flash_reads_image() {
        let backend = MockBackend::new().with_flash(2, &[1, 2, 3, 4]);
        let mut channel = backend.open_flash(2).unwrap();
        assert_eq!(channel.size_hint(), Some(4));

        let mut out = Vec::new();
        channel.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);

        assert!(backend.open_flash(0).is_none());
    }

    #[test]
    fn test_mock_flash_injected_failure() {
        let backend = MockBackend::new().with_failing_flash(0, &[0xAA; 16], 8, "link down");
        let mut channel = backend.open_flash(0).unwrap();

        let mut buf = [0u8; 32];
        assert_eq!(channel.read(&mut buf).unwrap(), 8);
        let err = channel.read(&mut buf).unwrap_err();
        assert_eq!(err.to_string(), "link down");
    }
}

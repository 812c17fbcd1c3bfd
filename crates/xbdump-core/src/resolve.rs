//! Device selection.
//!
//! A selector is either a PCI address (`0000:d8:00.0`, or `d8:00.0` with
//! domain 0000 implied) or a decimal enumeration index. Without a selector
//! the only device present is chosen.

use tracing::{debug, instrument};

use crate::backend::{DeviceBackend, DeviceInfo, ResolveError};

/// Resolve `selector` into an open device handle.
#[instrument(level = "debug", skip(backend))]
pub fn resolve_device<B>(backend: &B, selector: Option<&str>) -> Result<B::Device, ResolveError>
where
    B: DeviceBackend + ?Sized,
{
    let devices = backend.devices()?;
    let info = select(&devices, selector)?;
    debug!(device = %info, "Selected device");
    backend.open(info)
}

fn select<'a>(devices: &'a [DeviceInfo], selector: Option<&str>) -> Result<&'a DeviceInfo, ResolveError> {
    let selector = selector.map(str::trim).filter(|s| !s.is_empty());

    let Some(selector) = selector else {
        return match devices {
            [] => Err(ResolveError::NoDevices),
            [only] => Ok(only),
            _ => Err(ResolveError::Ambiguous {
                candidates: devices.iter().map(DeviceInfo::to_string).collect(),
            }),
        };
    };

    let found = if selector.bytes().all(|b| b.is_ascii_digit()) {
        let index: u32 = selector
            .parse()
            .map_err(|_| ResolveError::InvalidSelector(selector.to_string()))?;
        devices.iter().find(|d| d.index == index)
    } else {
        let bdf =
            normalize_bdf(selector).ok_or_else(|| ResolveError::InvalidSelector(selector.to_string()))?;
        devices.iter().find(|d| d.bdf == bdf)
    };

    found.ok_or_else(|| ResolveError::NotFound {
        selector: selector.to_string(),
    })
}

/// Normalize a PCI address to `dddd:bb:dd.f` in lowercase.
pub fn normalize_bdf(text: &str) -> Option<String> {
    let (rest, function) = text.rsplit_once('.')?;
    let parts: Vec<&str> = rest.split(':').collect();
    let (domain, bus, device) = match parts.as_slice() {
        [bus, device] => ("0", *bus, *device),
        [domain, bus, device] => (*domain, *bus, *device),
        _ => return None,
    };

    let field = |s: &str, max: u32| -> Option<u32> {
        if s.is_empty() || s.len() > 4 {
            return None;
        }
        u32::from_str_radix(s, 16).ok().filter(|v| *v <= max)
    };

    Some(format!(
        "{:04x}:{:02x}:{:02x}.{:x}",
        field(domain, 0xffff)?,
        field(bus, 0xff)?,
        field(device, 0x1f)?,
        field(function, 0x7)?
    ))
}

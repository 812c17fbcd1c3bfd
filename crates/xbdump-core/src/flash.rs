//! Flash image extraction.

use std::io::{self, Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::backend::DeviceBackend;
use crate::events::{DumpEvent, DumpObserver};
use crate::output::write_atomically;

/// Read buffer size.
const CHUNK_SIZE: usize = 64 * 1024;
/// Bytes between progress events.
const PROGRESS_STEP: u64 = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("{0} is an invalid index")]
    InvalidDeviceIndex(u32),

    #[error("Flash read back failed: {0}")]
    ExtractionFailed(String),
}

/// Stream the flash image of device `index` into `path`.
///
/// Returns the number of bytes written. The destination is only created once
/// the whole image has been read; an empty or short image is a failure.
/// Without `overwrite` an existing destination is never replaced.
#[instrument(level = "debug", skip_all, fields(index = index, path = %path.display()))]
pub fn extract<B, O>(
    backend: &B,
    index: u32,
    path: &Path,
    overwrite: bool,
    observer: &O,
) -> Result<u64, FlashError>
where
    B: DeviceBackend + ?Sized,
    O: DumpObserver + ?Sized,
{
    let Some(mut channel) = backend.open_flash(index) else {
        debug!(index, "No flash channel for device");
        return Err(FlashError::InvalidDeviceIndex(index));
    };

    let total = channel.size_hint();
    info!(index, ?total, output = %path.display(), "Reading flash image");

    write_atomically(path, overwrite, |w| copy_image(&mut channel, w, total, observer)).map_err(
        |e: io::Error| {
            debug!(index, error = %e, "Flash read back failed");
            FlashError::ExtractionFailed(e.to_string())
        },
    )
}

fn copy_image<R, O>(
    reader: &mut R,
    writer: &mut dyn Write,
    total: Option<u64>,
    observer: &O,
) -> io::Result<u64>
where
    R: Read + ?Sized,
    O: DumpObserver + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied: u64 = 0;
    let mut next_report = PROGRESS_STEP;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;

        if copied >= next_report {
            observer.on_event(&DumpEvent::Progress {
                current: copied,
                total,
            });
            next_report = copied + PROGRESS_STEP;
        }
    }

    if copied == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "device returned an empty image",
        ));
    }
    if let Some(total) = total
        && copied < total
    {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("image truncated at {} of {} bytes", copied, total),
        ));
    }

    observer.on_event(&DumpEvent::Progress {
        current: copied,
        total,
    });
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::events::{NullObserver, RecordingObserver};
    use tempfile::tempdir;

    #[test]
    fn test_extract_writes_image() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("flash.bin");
        let image: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let backend = MockBackend::new().with_flash(0, &image);
        let obs = RecordingObserver::default();

        let n = extract(&backend, 0, &path, false, &obs).unwrap();

        assert_eq!(n, image.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), image);
        assert_eq!(
            obs.events().last(),
            Some(&DumpEvent::Progress {
                current: image.len() as u64,
                total: Some(image.len() as u64)
            })
        );
    }

    #[test]
    fn test_invalid_index_creates_no_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("flash.bin");
        let backend = MockBackend::new().with_flash(0, b"data");

        let err = extract(&backend, 3, &path, false, &NullObserver).unwrap_err();

        assert_eq!(err, FlashError::InvalidDeviceIndex(3));
        assert_eq!(err.to_string(), "3 is an invalid index");
        assert!(!path.exists());
    }

    #[test]
    fn test_stream_failure_keeps_cause_in_message() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("flash.bin");
        let backend = MockBackend::new().with_failing_flash(0, &[0x5A; 4096], 1024, "PCIe link down");

        let err = extract(&backend, 0, &path, false, &NullObserver).unwrap_err();

        assert_eq!(err, FlashError::ExtractionFailed("PCIe link down".into()));
        assert!(!path.exists());
    }

    #[test]
    fn test_stream_failure_preserves_existing_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("flash.bin");
        std::fs::write(&path, b"previous dump").unwrap();
        let backend = MockBackend::new().with_failing_flash(0, &[0x5A; 64], 0, "io error");

        assert!(extract(&backend, 0, &path, true, &NullObserver).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"previous dump");
    }

    #[test]
    fn test_empty_image_is_a_failure() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("flash.bin");
        let backend = MockBackend::new().with_flash(0, &[]);

        let err = extract(&backend, 0, &path, false, &NullObserver).unwrap_err();

        assert!(matches!(err, FlashError::ExtractionFailed(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_short_image_is_a_failure() {
        let mut reader: &[u8] = b"abc";
        let mut out = Vec::new();
        let err = copy_image(&mut reader, &mut out, Some(10), &NullObserver).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

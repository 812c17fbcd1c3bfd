//! All-or-nothing output files.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

/// Write `path` through a temporary file in the same directory.
///
/// The temporary is renamed over `path` only after `write` succeeded and
/// the data reached the disk. On any error the temporary is removed and
/// `path` is left as it was. Without `overwrite`, an entry that appeared at
/// `path` while writing makes the final rename fail with `AlreadyExists`.
pub(crate) fn write_atomically<T, E, F>(path: &Path, overwrite: bool, write: F) -> Result<T, E>
where
    E: From<io::Error>,
    F: FnOnce(&mut dyn Write) -> Result<T, E>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    debug!(tmp = %tmp.path().display(), "Staging output");

    let value = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let value = write(&mut writer)?;
        writer.flush()?;
        value
    };
    tmp.as_file().sync_all()?;
    if overwrite {
        tmp.persist(path).map_err(|e| e.error)?;
    } else {
        tmp.persist_noclobber(path).map_err(|e| e.error)?;
    }
    Ok(value)
}

/// Absolute form of `path` for operator messages.
pub(crate) fn resolved(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_success_replaces_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.bin");
        fs::write(&path, "old").unwrap();

        let n: usize = write_atomically::<_, io::Error, _>(&path, true, |w| {
            w.write_all(b"new contents")?;
            Ok(12)
        })
        .unwrap();

        assert_eq!(n, 12);
        assert_eq!(fs::read(&path).unwrap(), b"new contents");
    }

    #[test]
    fn test_failure_leaves_nothing_behind() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.bin");

        let result: io::Result<()> = write_atomically(&path, true, |w| {
            w.write_all(b"partial")?;
            Err(io::Error::other("stream broke"))
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_no_overwrite_keeps_file_created_meanwhile() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.bin");

        let result: io::Result<()> = write_atomically(&path, false, |w| {
            fs::write(&path, "written by someone else")?;
            w.write_all(b"dump")
        });

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"written by someone else");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}

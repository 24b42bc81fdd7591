// Filesystem adapter - the blocking primitives the store and write queue sit on

use crate::error::Result;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

const REMOVE_ATTEMPTS: u32 = 10;
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Filesystem operations consumed by the store.
///
/// Methods block; async callers run them on tokio's blocking pool.
pub trait Filesystem: Send + Sync + 'static {
    /// Whether `path` exists. Unreadable paths count as missing.
    fn exists(&self, path: &Path) -> bool;

    /// Create `path` and any missing parents.
    fn make_directory(&self, path: &Path) -> io::Result<()>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the whole content of `path` with `bytes`.
    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Remove a file or directory tree. A missing target is not an error.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn copy_file(&self, destination: &Path, source: &Path) -> io::Result<()>;
}

/// [`Filesystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl Filesystem for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        std::fs::metadata(path).is_ok()
    }

    fn make_directory(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    /// Writes to a temp file beside the target and renames it into place,
    /// so readers never observe a half-written collection.
    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut attempt = 1;
        loop {
            match remove_once(path) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < REMOVE_ATTEMPTS => {
                    log::debug!(
                        "Removing {} failed (attempt {attempt}/{REMOVE_ATTEMPTS}): {e}",
                        path.display()
                    );
                    attempt += 1;
                    thread::sleep(REMOVE_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn copy_file(&self, destination: &Path, source: &Path) -> io::Result<()> {
        std::fs::copy(source, destination).map(|_| ())
    }
}

/// Run a blocking filesystem call on tokio's blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

fn remove_once(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::time::Instant;
use tracing::trace;

use super::{CacheError, CacheResult};

/// How often a contended lock is retried.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A file held under an exclusive advisory lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: Utf8PathBuf,
}

impl LockedFile {
    /// Open (creating if needed) and exclusively lock `path`.
    ///
    /// Retries every [`LOCK_POLL_INTERVAL`] while another handle holds the
    /// lock, and gives up with [`CacheError::LockTimeout`] once `timeout` has
    /// passed.
    pub async fn acquire(path: &Utf8Path, timeout: Duration) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CacheError::io(parent))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(CacheError::io(path))?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => {
                    trace!(%path, waited_ms = started.elapsed().as_millis() as u64, "lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(CacheError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL.min(timeout - waited)).await;
                }
                Err(TryLockError::Error(source)) => {
                    return Err(CacheError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }

    /// The locked file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The whole file content.
    pub fn read_all(&mut self) -> CacheResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut bytes))
            .map_err(CacheError::io(&self.path))?;
        Ok(bytes)
    }

    /// Replace the file content and flush it to disk.
    pub fn rewrite(&mut self, bytes: &[u8]) -> CacheResult<()> {
        let file = &mut self.file;
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(bytes))
            .and_then(|()| file.sync_data())
            .map_err(CacheError::io(&self.path))
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            trace!(path = %self.path, error = %e, "unlock failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_path(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[tokio::test]
    async fn creates_missing_file_and_parent() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir, "nested/records/a.json");
        let mut locked = LockedFile::acquire(&path, Duration::from_millis(50)).await.unwrap();
        assert!(path.exists());
        assert!(locked.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rewrite_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir, "a.json");
        let mut locked = LockedFile::acquire(&path, Duration::from_millis(50)).await.unwrap();
        locked.rewrite(b"a much longer first version").unwrap();
        locked.rewrite(b"short").unwrap();
        assert_eq!(locked.read_all().unwrap(), b"short");
        drop(locked);
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir, "a.json");
        let holder = LockedFile::acquire(&path, Duration::from_millis(50)).await.unwrap();

        let started = std::time::Instant::now();
        let err = LockedFile::acquire(&path, Duration::from_millis(50)).await.unwrap_err();

        assert!(matches!(err, CacheError::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
        drop(holder);
        assert!(LockedFile::acquire(&path, Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_gets_lock_once_released() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir, "a.json");
        let holder = LockedFile::acquire(&path, Duration::from_millis(50)).await.unwrap();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(holder);
        });
        let waiter = LockedFile::acquire(&path, Duration::from_secs(5)).await;
        release.await.unwrap();
        assert!(waiter.is_ok());
    }
}

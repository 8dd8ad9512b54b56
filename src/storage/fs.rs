use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Prefix of in-flight temp files; listings skip anything starting with a dot.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Write `data` to `target` so that readers see either the old file or the
/// complete new one: temp file in the same directory, fsync, rename.
pub fn atomic_write(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", target.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;

    let mut file = temp.as_file();
    file.write_all(data)?;
    file.sync_all()?;

    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Exclusive advisory lock on a file, held until drop.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    // Closing the descriptor releases the flock
    _file: File,
}

impl DirLock {
    /// Try to take the lock, polling until `wait` has elapsed.
    /// Returns `Ok(None)` if another holder kept it the whole time.
    pub async fn acquire(path: &Path, wait: Duration) -> io::Result<Option<DirLock>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + wait;
        loop {
            if try_flock_exclusive(&file)? {
                debug!(path = %path.display(), "Lock acquired");
                return Ok(Some(DirLock {
                    path: path.to_path_buf(),
                    _file: file,
                }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Lock released");
    }
}

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if the file is
/// already locked through another open file description.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

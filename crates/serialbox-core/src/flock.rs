//! Advisory writer lock.
//!
//! The engine is single-writer, multi-reader across processes. A serializer
//! opened in Write or Append mode holds a non-blocking POSIX `fcntl`
//! write lock on `<prefix>.lock` for its lifetime; a second writer fails
//! with `ArchiveLocked` instead of corrupting the archive. Readers do not
//! lock. On non-Unix platforms the lock is a no-op.

use std::fs::File;
use std::path::{Path, PathBuf};

use serialbox_error::Result;

/// Held advisory lock; released on drop (closing the file descriptor
/// releases the fcntl lock).
#[derive(Debug)]
pub struct ArchiveLock {
    #[allow(dead_code)]
    file: Option<File>,
    path: PathBuf,
}

impl ArchiveLock {
    /// Acquire the writer lock for `prefix` in `directory`.
    pub fn acquire(directory: &Path, prefix: &str) -> Result<Self> {
        let path = directory.join(format!("{prefix}.lock"));
        let file = lock_file(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn lock_file(path: &Path) -> Result<Option<File>> {
    use std::os::fd::AsRawFd;

    use serialbox_error::SerialboxError;

    let file = File::options()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    let flock = libc::flock {
        l_type: libc::F_WRLCK as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    match nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_SETLK(&flock)) {
        Ok(_) => Ok(Some(file)),
        Err(nix::errno::Errno::EACCES | nix::errno::Errno::EAGAIN) => {
            Err(SerialboxError::ArchiveLocked {
                path: path.to_owned(),
            })
        }
        Err(errno) => Err(SerialboxError::Io(std::io::Error::from(errno))),
    }
}

#[cfg(not(unix))]
fn lock_file(path: &Path) -> Result<Option<File>> {
    let _ = path;
    Ok(None)
}

//! Host-wide lock serializing driver invocations.
//!
//! Invocations for different VMs run as separate processes and may touch
//! the same bridge, so the lock is an `flock(2)` on a well-known file
//! rather than an in-process mutex. Acquisition blocks without a timeout:
//! an invocation that hangs while holding the lock stalls every other
//! invocation on the host.

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, VnmError};

/// A named lock file shared by all driver processes on the host
#[derive(Debug, Clone)]
pub struct InvocationLock {
    path: PathBuf,
}

impl InvocationLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held by this process
    pub fn acquire(&self) -> Result<LockGuard> {
        let file = self.open()?;
        debug!("Waiting for lock {}", self.path.display());

        loop {
            match flock(file.as_raw_fd(), FlockArg::LockExclusive) {
                Ok(()) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(self.error(e.desc())),
            }
        }

        debug!("Acquired lock {}", self.path.display());
        Ok(LockGuard {
            file: Some(file),
            path: self.path.clone(),
        })
    }

    /// Take the lock if it is free, `None` if another invocation holds it
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let file = self.open()?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Some(LockGuard {
                file: Some(file),
                path: self.path.clone(),
            })),
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(self.error(e.desc())),
        }
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.error(&e.to_string()))?;
            }
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.error(&e.to_string()))
    }

    fn error(&self, message: &str) -> VnmError {
        VnmError::Lock {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }
}

/// Holds the invocation lock; dropping it releases the lock
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard {
    /// Release the lock explicitly
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        flock(file.as_raw_fd(), FlockArg::Unlock).map_err(|e| VnmError::Lock {
            path: self.path.clone(),
            message: e.desc().to_string(),
        })?;

        debug!("Released lock {}", self.path.display());
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock even if unlock fails
        if let Err(e) = self.unlock() {
            warn!("{}", e);
        }
    }
}

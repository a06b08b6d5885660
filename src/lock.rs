use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::constants::FILE_MODE;
use crate::error::{Error, Result};
use crate::types::LockMode;

/// Held advisory lock on a key.
///
/// Backed by `flock(2)` on the key's file, so two guards on the same key
/// conflict whether they live in different processes or in different threads
/// of one process. The lock is released by [`DbLock::unlock`] or, failing
/// that, when the guard is dropped.
///
/// Converting between modes is not atomic: the kernel may drop the old lock
/// before granting the new one, so anything read under a shared lock must be
/// checked again after [`DbLock::upgrade`] returns.
#[derive(Debug)]
pub struct DbLock {
    /// Backing lock file
    file: File,
    /// Resolved path of the lock file
    path: PathBuf,
    /// Currently held level
    mode: LockMode,
    /// Handle came from a read-only database
    read_only: bool,
    /// Lock still held; cleared by an explicit unlock
    held: bool,
}

impl DbLock {
    /// Acquire a lock, blocking until it is granted
    pub(crate) fn acquire(path: PathBuf, mode: LockMode, read_only: bool) -> Result<Self> {
        let file = open_lock_file(&path, read_only)?;
        flock(&file, mode.flock_op()).map_err(|source| Error::Lock {
            path: path.clone(),
            source,
        })?;
        debug!("acquired {:?} lock on {}", mode, path.display());
        Ok(DbLock {
            file,
            path,
            mode,
            read_only,
            held: true,
        })
    }

    /// Acquire a lock if no conflicting holder exists
    pub(crate) fn try_acquire(path: PathBuf, mode: LockMode, read_only: bool) -> Result<Option<Self>> {
        let file = open_lock_file(&path, read_only)?;
        match flock(&file, mode.flock_op() | libc::LOCK_NB) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(source) => return Err(Error::Lock { path, source }),
        }
        debug!("acquired {:?} lock on {}", mode, path.display());
        Ok(Some(DbLock {
            file,
            path,
            mode,
            read_only,
            held: true,
        }))
    }

    /// Current lock level
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Path of the backing lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Convert a shared lock to exclusive, waiting for other shared holders
    /// to go away. Does nothing if the lock is already exclusive.
    pub fn upgrade(&mut self) -> Result<()> {
        if self.mode == LockMode::Exclusive {
            return Ok(());
        }
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.convert(LockMode::Exclusive)
    }

    /// Convert an exclusive lock back to shared.
    /// Does nothing if the lock is already shared.
    pub fn downgrade(&mut self) -> Result<()> {
        if self.mode == LockMode::Shared {
            return Ok(());
        }
        self.convert(LockMode::Shared)
    }

    /// Release the lock and close the backing file
    pub fn unlock(mut self) -> Result<()> {
        flock(&self.file, libc::LOCK_UN).map_err(|source| Error::Lock {
            path: self.path.clone(),
            source,
        })?;
        self.held = false;
        debug!("released lock on {}", self.path.display());
        Ok(())
    }

    fn convert(&mut self, mode: LockMode) -> Result<()> {
        flock(&self.file, mode.flock_op()).map_err(|source| Error::Lock {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "converted lock on {} from {:?} to {:?}",
            self.path.display(),
            self.mode,
            mode
        );
        self.mode = mode;
        Ok(())
    }
}

impl Drop for DbLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        // Unlock explicitly; the descriptor may be shared with a forked child
        if let Err(e) = flock(&self.file, libc::LOCK_UN) {
            warn!("failed to release lock on {}: {}", self.path.display(), e);
        }
    }
}

fn open_lock_file(path: &Path, read_only: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if !read_only {
        options.write(true).create(true).mode(FILE_MODE);
    }
    options.open(path).map_err(|source| Error::Lock {
        path: path.to_path_buf(),
        source,
    })
}

/// `flock(2)`, retried on EINTR
fn flock(file: &File, op: libc::c_int) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

use std::fs::{self, DirBuilder, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};

use crate::codec::encode_key;
use crate::constants::{
    DbFlags, BACKUP_SUFFIX, DIR_MODE, FILE_MODE, LOCK_KEY, TEMP_PREFIX, TEMP_SUFFIX,
};
use crate::cursor::DbCursor;
use crate::dir_max;
use crate::error::{Error, Result};
use crate::lock::DbLock;
use crate::types::LockMode;

/// Database handle
///
/// A thin layer over the filesystem: every key names a file below `base`.
/// The handle itself carries no mutable state, so it can be cloned and shared
/// between threads freely. Nothing here locks implicitly; callers that need
/// ordering between readers and writers hold a [`DbLock`].
#[derive(Debug, Clone)]
pub struct Db {
    /// Directory every key resolves under
    base: PathBuf,
    /// Database flags
    flags: DbFlags,
}

impl Db {
    /// Create a handle rooted at `base`. No I/O happens until first use.
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self::with_flags(base, DbFlags::empty())
    }

    /// Create a handle with explicit flags
    pub fn with_flags<P: AsRef<Path>>(base: P, flags: DbFlags) -> Self {
        Db {
            base: base.as_ref().to_path_buf(),
            flags,
        }
    }

    /// Base directory of the database
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Flags this handle was created with
    pub fn flags(&self) -> DbFlags {
        self.flags
    }

    /// Absolute path a key resolves to
    pub fn path_of(&self, key: &str) -> Result<PathBuf> {
        let rel = encode_key(key)?;
        if rel.as_os_str().is_empty() {
            return Ok(self.base.clone());
        }
        Ok(self.base.join(rel))
    }

    /// Get a record.
    ///
    /// Only regular files are records; a directory or symlink at `key` is
    /// reported as `NotFound`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_of(key)?;
        trace!("get {:?} from {}", key, path.display());

        let meta = fs::symlink_metadata(&path).map_err(|e| Error::from_io(e, &path))?;
        if !meta.file_type().is_file() {
            return Err(Error::NotFound(path));
        }

        let mut file = File::open(&path).map_err(|e| Error::from_io(e, &path))?;
        // Size from the open handle: a concurrent rename swaps the inode, not
        // the contents of the one we hold
        let size = file.metadata()?.len();
        read_record(&mut file, &path, size)
    }

    /// Put a record, creating parent directories as needed.
    ///
    /// The payload goes to a hidden temp file next to the target which is
    /// then renamed into place, so readers see either the old or the new
    /// record and never a prefix of it. If the write fails, directories this
    /// call left empty are pruned again.
    pub fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        let path = self.path_of(key)?;
        let parent = path
            .parent()
            .filter(|_| path != self.base)
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidPath(path.clone()))?;

        self.ensure_dir(&parent)?;
        if let Ok(meta) = fs::symlink_metadata(&path) {
            if meta.is_dir() {
                return Err(Error::InvalidPath(path));
            }
        }

        if let Err(e) = self.write_atomic(&parent, &path, data) {
            warn!("put {:?} failed: {}", key, e);
            self.prune_empty_dirs(&path);
            return Err(e);
        }

        debug!("put {:?}: {} bytes to {}", key, data.len(), path.display());
        remove_backup(&path);
        Ok(())
    }

    /// Delete a record.
    ///
    /// Directories left empty by the removal are pruned bottom-up, stopping
    /// at the first one that still has entries and never touching `base`.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        let path = self.path_of(key)?;

        let meta = fs::symlink_metadata(&path).map_err(|e| Error::from_io(e, &path))?;
        if meta.is_dir() {
            return Err(Error::InvalidPath(path));
        }
        fs::remove_file(&path).map_err(|e| Error::from_io(e, &path))?;
        debug!("deleted {:?} at {}", key, path.display());

        self.prune_empty_dirs(&path);
        Ok(())
    }

    /// Whether `key` names a directory
    pub fn is_dir(&self, key: &str) -> bool {
        self.path_of(key).map(|p| p.is_dir()).unwrap_or(false)
    }

    /// Whether `key` names a record
    pub fn exists(&self, key: &str) -> bool {
        self.path_of(key)
            .and_then(|p| fs::symlink_metadata(p).map_err(Error::Io))
            .map(|meta| meta.file_type().is_file())
            .unwrap_or(false)
    }

    /// Remove temp files left by writers that died mid-put below `key`,
    /// then prune the directories that leaves empty.
    ///
    /// A temp file belonging to a put still in flight is removed too, so
    /// callers hold the exclusive lock. Returns the number of temp files
    /// removed.
    pub fn sweep(&self, key: &str) -> Result<usize> {
        self.check_writable()?;
        let path = self.path_of(key)?;
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::from_io(e, &path)),
        }

        let removed = self.sweep_dir(&path)?;
        if removed > 0 {
            debug!("swept {} stale temp files under {:?}", removed, key);
        }
        Ok(removed)
    }

    /// Open a cursor over the immediate children of `key`
    pub fn open_dir(&self, key: &str) -> Result<DbCursor> {
        let path = self.path_of(key)?;
        DbCursor::open(path, key)
    }

    /// Highest integer child of `key`, or `None` if it has none.
    ///
    /// Deleted entries leave holes: after removing the highest entry this
    /// reports the highest one still present, never a renumbered sequence.
    pub fn find_max(&self, key: &str) -> Result<Option<u64>> {
        let path = self.path_of(key)?;
        let max = dir_max::find_max(&path)?;
        trace!("find_max {:?} = {:?}", key, max);
        Ok(max)
    }

    /// Next free slot of the append-only collection at `key`
    pub fn next_index(&self, key: &str) -> Result<u64> {
        match self.find_max(key)? {
            None => Ok(0),
            Some(n) => n
                .checked_add(1)
                .ok_or_else(|| Error::Io(io::Error::other("index space exhausted"))),
        }
    }

    /// Take the database-wide lock in shared mode
    pub fn lock(&self) -> Result<DbLock> {
        self.lock_key(LOCK_KEY, LockMode::Shared)
    }

    /// Take the database-wide lock in exclusive mode
    pub fn lock_exclusive(&self) -> Result<DbLock> {
        self.lock_key(LOCK_KEY, LockMode::Exclusive)
    }

    /// Lock `key`, blocking until no conflicting holder remains
    pub fn lock_key(&self, key: &str, mode: LockMode) -> Result<DbLock> {
        let path = self.prepare_lock(key, mode)?;
        DbLock::acquire(path, mode, self.read_only())
    }

    /// Lock `key` without blocking; `None` if a conflicting holder exists
    pub fn try_lock_key(&self, key: &str, mode: LockMode) -> Result<Option<DbLock>> {
        let path = self.prepare_lock(key, mode)?;
        DbLock::try_acquire(path, mode, self.read_only())
    }

    fn prepare_lock(&self, key: &str, mode: LockMode) -> Result<PathBuf> {
        if mode == LockMode::Exclusive {
            self.check_writable()?;
        }
        let path = self.path_of(key)?;
        if !self.read_only() {
            if let Some(parent) = path.parent() {
                self.ensure_dir(parent).map_err(|e| match e {
                    Error::Io(source) => Error::Lock {
                        path: path.clone(),
                        source,
                    },
                    other => other,
                })?;
            }
        }
        Ok(path)
    }

    /// Temp file, fsync, rename, fsync of the directory
    fn write_atomic(&self, parent: &Path, path: &Path, data: &[u8]) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .permissions(fs::Permissions::from_mode(FILE_MODE))
            .tempfile_in(parent)?;
        tmp.write_all(data)?;

        let sync = !self.flags.contains(DbFlags::NOSYNC);
        if sync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        if sync {
            sync_dir(parent)?;
        }
        Ok(())
    }

    /// Depth-first sweep of one directory; removes it too once empty unless
    /// it is the base
    fn sweep_dir(&self, dir: &Path) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                removed += self.sweep_dir(&path)?;
            } else if is_temp_name(&entry.file_name().to_string_lossy()) {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        warn!("removed stale temp file {}", path.display());
                        removed += 1;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::Io(e)),
                }
            }
        }

        if dir != self.base {
            match fs::remove_dir(dir) {
                Ok(()) => debug!("pruned empty directory {}", dir.display()),
                Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {}
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(removed)
    }

    fn read_only(&self) -> bool {
        self.flags.contains(DbFlags::RDONLY)
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Make sure `dir` exists as a directory, creating missing levels.
    ///
    /// An existing non-directory anywhere on the way is an `InvalidPath`.
    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(Error::InvalidPath(dir.to_path_buf())),
            // ENOTDIR: some ancestor is a file, the recursion below finds it
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if e.raw_os_error() == Some(libc::ENOTDIR) => {}
            Err(e) => return Err(Error::Io(e)),
        }

        if let Some(parent) = dir.parent() {
            if !parent.as_os_str().is_empty() {
                self.ensure_dir(parent)?;
            }
        }

        match DirBuilder::new().mode(DIR_MODE).create(dir) {
            Ok(()) => {
                debug!("created directory {}", dir.display());
                Ok(())
            }
            // Lost a race with another writer
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if dir.is_dir() {
                    Ok(())
                } else {
                    Err(Error::InvalidPath(dir.to_path_buf()))
                }
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn prune_empty_dirs(&self, leaf: &Path) {
        let mut dir = leaf.parent();
        while let Some(d) = dir {
            if d == self.base || !d.starts_with(&self.base) {
                break;
            }
            match fs::remove_dir(d) {
                Ok(()) => debug!("pruned empty directory {}", d.display()),
                Err(e) => {
                    let errno = e.raw_os_error();
                    if errno != Some(libc::ENOTEMPTY) && errno != Some(libc::EEXIST) {
                        warn!("failed to prune {}: {}", d.display(), e);
                    }
                    break;
                }
            }
            dir = d.parent();
        }
    }
}

/// Read exactly `expected` bytes, retrying on EINTR
fn read_record(file: &mut File, path: &Path, expected: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(expected)
        .map_err(|_| Error::Io(io::Error::from(io::ErrorKind::OutOfMemory)))?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    if filled < len {
        return Err(Error::ShortRead {
            path: path.to_path_buf(),
            expected,
            actual: filled as u64,
        });
    }
    Ok(buf)
}

fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

fn is_temp_name(name: &str) -> bool {
    name.len() > TEMP_PREFIX.len() + TEMP_SUFFIX.len()
        && name.starts_with(TEMP_PREFIX)
        && name.ends_with(TEMP_SUFFIX)
}

/// Remove `<path>~` if an older rename-aside writer left one behind
fn remove_backup(path: &Path) {
    let mut backup = path.as_os_str().to_owned();
    backup.push(BACKUP_SUFFIX);
    match fs::remove_file(&backup) {
        Ok(()) => debug!("removed stale backup {:?}", backup),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove backup {:?}: {}", backup, e),
    }
}

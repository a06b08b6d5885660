use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Error, Result};

/// Directory cursor
///
/// Holds one open directory handle and walks its entries forward once. Names
/// are yielded relative to the directory, as they appear on disk: a sharded
/// numeric child shows up as its shard marker (`_a`, ...), a small one as
/// `_NN`. Dot-entries (lock files, in-flight temp files) are skipped.
#[derive(Debug)]
pub struct DbCursor {
    /// Logical key of the directory
    key: String,
    /// Resolved directory path
    path: PathBuf,
    /// Open directory handle
    dir: ReadDir,
}

impl DbCursor {
    /// Open a cursor on `path`; `NotFound` if it is missing or not a directory
    pub(crate) fn open(path: PathBuf, key: &str) -> Result<Self> {
        let dir = fs::read_dir(&path).map_err(|e| Error::from_io(e, &path))?;
        Ok(DbCursor {
            key: key.trim_end_matches('/').to_string(),
            path,
            dir,
        })
    }

    /// Logical key of the directory
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resolved directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full key of a child name returned by this cursor
    pub fn child_key(&self, name: &str) -> String {
        if self.key.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.key, name)
        }
    }

    /// Close the cursor, releasing the directory handle
    pub fn close(self) {}
}

impl Iterator for DbCursor {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.dir.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(Error::Io(e))),
            };

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("skipping non UTF-8 entry {:?} in {}", raw, self.path.display());
                    continue;
                }
            };

            if name.starts_with('.') {
                continue;
            }
            return Some(Ok(name));
        }
    }
}

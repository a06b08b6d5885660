//! Highest integer child of a directory.
//!
//! Numeric children are sharded by the codec, so the answer cannot be read
//! off a single listing. The top level holds either plain `_NN` entries or a
//! shard marker; below a marker each level holds two-digit names and the
//! number is rebuilt one base-100 digit per level.

use std::path::Path;

use crate::codec::{shard_groups, two_digits};
use crate::constants::SHARD_BASE;
use crate::cursor::DbCursor;
use crate::error::{Error, Result};

/// What the top level of a collection directory holds
#[derive(Debug, PartialEq)]
enum TopLevel {
    Empty,
    Plain(u64),
    Sharded(u32),
}

pub(crate) fn find_max(dir: &Path) -> Result<Option<u64>> {
    let top = match scan_top(dir) {
        Ok(top) => top,
        Err(Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let groups = match top {
        TopLevel::Empty => return Ok(None),
        TopLevel::Plain(n) => return Ok(Some(n)),
        TopLevel::Sharded(groups) => groups,
    };

    let mut path = dir.join(marker_name(groups));
    let mut result: u64 = 0;
    for _ in 0..groups {
        let level_max = scan_level(&path)?.ok_or_else(|| Error::BrokenShard(path.clone()))?;
        result = result
            .checked_mul(SHARD_BASE)
            .and_then(|r| r.checked_add(level_max))
            .ok_or_else(|| Error::BrokenShard(path.clone()))?;
        path.push(format!("{:02}", level_max));
    }
    Ok(Some(result))
}

/// Scan the collection directory itself. Any shard marker beats plain
/// entries, and the marker with the most groups wins.
fn scan_top(dir: &Path) -> Result<TopLevel> {
    let mut plain: Option<u64> = None;
    let mut sharded: Option<u32> = None;

    for name in DbCursor::open(dir.to_path_buf(), "")? {
        let name = name?;
        if let Some(groups) = shard_groups(&name) {
            sharded = sharded.max(Some(groups));
        } else if let Some(n) = name.strip_prefix('_').and_then(two_digits) {
            plain = plain.max(Some(n));
        }
    }

    Ok(match (sharded, plain) {
        (Some(groups), _) => TopLevel::Sharded(groups),
        (None, Some(n)) => TopLevel::Plain(n),
        (None, None) => TopLevel::Empty,
    })
}

/// Highest two-digit name inside one shard level
fn scan_level(dir: &Path) -> Result<Option<u64>> {
    let cursor = match DbCursor::open(dir.to_path_buf(), "") {
        Ok(cursor) => cursor,
        Err(Error::NotFound(path)) => return Err(Error::BrokenShard(path)),
        Err(e) => return Err(e),
    };

    let mut max = None;
    for name in cursor {
        if let Some(n) = two_digits(&name?) {
            max = max.max(Some(n));
        }
    }
    Ok(max)
}

fn marker_name(groups: u32) -> String {
    format!("_{}", char::from(b'a' + (groups - 2) as u8))
}

//! Key to path mapping.
//!
//! A key is a `/`-separated list of components. Components of the form
//! `_<digits><tail>` are numeric: the number is rewritten as a chain of
//! two-digit directories so that no directory ever holds more than a hundred
//! numeric children.
//!
//! ```text
//! _5        -> _05
//! _99       -> _99
//! _100      -> _a/01/00
//! _9999     -> _a/99/99
//! _10000    -> _b/01/00/00
//! _12.xml   -> _12.xml
//! ```
//!
//! The marker letter counts digit groups beyond the first, so `_a` holds two
//! groups, `_b` three and so on up to `_i` for the largest `u64`.

use std::borrow::Cow;
use std::path::PathBuf;

use crate::constants::{MAX_SHARD_GROUPS, SHARD_BASE};
use crate::error::{Error, Result};

/// Encode an integer as its (possibly sharded) relative path
pub fn encode_index(n: u64) -> String {
    let mut groups = 1;
    let mut tmp = n;
    while tmp >= SHARD_BASE {
        tmp /= SHARD_BASE;
        groups += 1;
    }

    if groups == 1 {
        return format!("_{:02}", n);
    }

    // Least significant group first, then flip
    let mut chain = Vec::with_capacity(groups as usize);
    let mut rest = n;
    for _ in 0..groups {
        chain.push(format!("{:02}", rest % SHARD_BASE));
        rest /= SHARD_BASE;
    }
    chain.reverse();

    format!("_{}/{}", marker_letter(groups), chain.join("/"))
}

/// Encode a single key component; non-numeric components pass through
pub fn encode_component(comp: &str) -> Cow<'_, str> {
    match split_numeric(comp) {
        Some((n, tail)) => Cow::Owned(format!("{}{}", encode_index(n), tail)),
        None => Cow::Borrowed(comp),
    }
}

/// Map a logical key to a path relative to the database base directory.
///
/// Empty components are skipped, so `"a//b/"` and `"a/b"` are the same key
/// and `""` is the root. `.`, `..` and bare shard markers are rejected.
pub fn encode_key(key: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for comp in key.split('/').filter(|c| !c.is_empty()) {
        if comp == "." || comp == ".." || shard_groups(comp).is_some() {
            return Err(Error::InvalidKey {
                key: key.to_string(),
                component: comp.to_string(),
            });
        }
        path.push(&*encode_component(comp));
    }
    Ok(path)
}

/// Inverse of [`encode_index`].
///
/// Returns `None` for anything `encode_index` never produces, including
/// non-canonical chains with a leading `00` group.
pub fn decode_path(rel: &str) -> Option<u64> {
    let mut parts = rel.split('/');
    let head = parts.next()?;

    if let Some(n) = head.strip_prefix('_').and_then(two_digits) {
        if head.len() == 3 && parts.next().is_none() {
            return Some(n);
        }
        return None;
    }

    let groups = shard_groups(head)?;
    let mut result: u64 = 0;
    for i in 0..groups {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        let digits = two_digits(part)?;
        if i == 0 && digits == 0 {
            return None;
        }
        result = result.checked_mul(SHARD_BASE)?.checked_add(digits)?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(result)
}

/// Logical key of the `n`th item of `collection`
pub fn index_key(collection: &str, n: u64) -> String {
    let collection = collection.trim_end_matches('/');
    if collection.is_empty() {
        format!("_{}", n)
    } else {
        format!("{}/_{}", collection, n)
    }
}

/// Number of digit groups a shard marker (`_a`, `_b`, ...) stands for
pub(crate) fn shard_groups(name: &str) -> Option<u32> {
    match name.as_bytes() {
        [b'_', letter @ b'a'..=b'z'] => {
            let groups = u32::from(letter - b'a') + 2;
            (groups <= MAX_SHARD_GROUPS).then_some(groups)
        }
        _ => None,
    }
}

/// Value of the two leading ASCII digits of `s`
pub(crate) fn two_digits(s: &str) -> Option<u64> {
    match s.as_bytes() {
        [a @ b'0'..=b'9', b @ b'0'..=b'9', ..] => Some(u64::from(a - b'0') * 10 + u64::from(b - b'0')),
        _ => None,
    }
}

fn marker_letter(groups: u32) -> char {
    char::from(b'a' + (groups - 2) as u8)
}

/// Split `_<digits><tail>` into the number and the tail
fn split_numeric(comp: &str) -> Option<(u64, &str)> {
    let rest = comp.strip_prefix('_')?;
    let end = rest
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    // Too large for u64: treat as an ordinary name
    let n = rest[..end].parse::<u64>().ok()?;
    Some((n, &rest[end..]))
}

//! Hierarchical key-value store on top of a plain directory tree.
//!
//! Keys are `/`-separated paths; each record is an ordinary file holding
//! exactly the stored bytes. Numeric components (`_42`, `_12345`) are sharded
//! into two-digit directory chains so collections can grow without piling
//! thousands of entries into one directory, and [`Db::find_max`] recovers the
//! highest index to append after it.
//!
//! ```no_run
//! use keytree::{codec, Db};
//!
//! # fn main() -> keytree::Result<()> {
//! let db = Db::new("/var/lib/site");
//! let mut lock = db.lock()?;
//! let next = db.next_index("articles")?;
//! lock.upgrade()?;
//! let key = codec::index_key("articles", next);
//! db.put(&format!("{}/article.xml", key), b"<article/>")?;
//! lock.unlock()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod constants;
mod cursor;
mod database;
mod dir_max;
mod error;
mod lock;
mod types;

pub use constants::{DbFlags, LOCK_KEY};
pub use cursor::DbCursor;
pub use database::Db;
pub use error::{Error, Result};
pub use lock::DbLock;
pub use types::LockMode;

//! `atjob-store`: versioned object storage with watch notifications.
//!
//! The controller only ever sees the [`ObjectStore`] capability trait:
//! strongly-consistent `get`, `create` that fails on an existing key, and
//! `update` that succeeds only against the last-read `resource_version`.
//!
//! | Backend         | Durability      | Watch scope   |
//! |-----------------|-----------------|---------------|
//! | [`MemoryStore`] | process lifetime | in-process   |
//! | [`SqliteStore`] | SQLite file     | in-process (pair with periodic resync) |

pub mod db;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{ObjectStore, WatchEvent, WATCH_CAPACITY};

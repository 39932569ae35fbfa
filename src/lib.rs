// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! A persistent, ordered, string-keyed dictionary backed by a transactional
//! storage engine (SQLite, in WAL mode).
//!
//! Databases are opened through a [`Registry`], which hands out [`Cursor`]s.
//! Any number of cursors, on any number of threads, may be open on the same
//! file; they share one engine instance, which is created with the first
//! cursor and terminated with the last.
//!
//! ```
//! use std::sync::Arc;
//!
//! use shelfdb::{
//!     OpenMode,
//!     Registry,
//! };
//! use tempfile::Builder;
//!
//! let root = Builder::new().prefix("simple-db").tempdir().unwrap();
//! let registry = Arc::new(Registry::new());
//!
//! let cursor = registry.open(root.path().join("simple.db"), OpenMode::New, false).unwrap();
//! cursor.set("b", "2").unwrap();
//! cursor.set("a", "1").unwrap();
//! cursor.set("c", None::<&str>).unwrap();
//!
//! assert_eq!(cursor.get("a").unwrap(), Some("1".to_owned()));
//! assert_eq!(cursor.get("c").unwrap(), None);
//! assert!(cursor.get("d").unwrap_err().is_key_error());
//!
//! // Keys come back in order, whatever order they went in.
//! assert_eq!(cursor.keys().unwrap(), vec!["a", "b", "c"]);
//!
//! cursor.delete("a").unwrap();
//! assert_eq!(cursor.len().unwrap(), 2);
//!
//! // Reading while iterating is fine: no transaction is held between items.
//! for item in cursor.iter().unwrap() {
//!     let (key, value) = item.unwrap();
//!     assert!(cursor.contains(&key).unwrap());
//!     assert_eq!(cursor.get(&key).unwrap(), value);
//! }
//!
//! cursor.close().unwrap();
//! ```
//!
//! Pick a mode with [`OpenMode`], or parse the one-letter forms `"r"`, `"w"`,
//! `"c"` and `"n"`. Commits flush the log to disk unless the cursor was opened
//! with `lazy_update`.

mod backend;
mod cursor;
mod database;
mod error;
mod iter;
mod key;
mod mode;
mod registry;
mod scope;

use std::path::Path;

pub use backend::{
    AttachFlags,
    BackendError,
    BackendInstance,
    BackendInstanceBuilder,
    BackendSession,
    ColumnFlags,
    ColumnId,
    CommitMode,
    CreateDatabaseFlags,
    IndexFlags,
    Move,
    SeekMode,
    Sqlite,
    SqliteError,
    SqliteInstance,
    SqliteSession,
    SqliteTable,
    UpdateKind,
};
pub use cursor::{
    Cursor,
    Record,
};
pub use error::StoreError;
pub use iter::{
    Iter,
    Keys,
    Values,
};
pub use key::{
    ToKey,
    ToValue,
    NONE_KEY,
};
pub use mode::OpenMode;
pub use registry::Registry;
pub use scope::{
    TransactionScope,
    UpdateScope,
};

/// Open a cursor on `path` through the process-wide [`Registry`].
pub fn open<P>(path: P, mode: OpenMode, lazy_update: bool) -> Result<Cursor, StoreError>
where
    P: AsRef<Path>,
{
    Registry::singleton().open(path, mode, lazy_update)
}

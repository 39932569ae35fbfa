// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::{
    cell::RefCell,
    fmt,
    path::Path,
    sync::Arc,
};

use log::{
    debug,
    trace,
    warn,
};

use crate::{
    backend::{
        BackendInstanceBuilder,
        BackendSession,
        ColumnId,
        CommitMode,
        Move,
        SeekMode,
        Sqlite,
        UpdateKind,
    },
    database::SharedDatabase,
    error::StoreError,
    iter::{
        Iter,
        Keys,
        Values,
    },
    key::{
        ToKey,
        ToValue,
        NONE_KEY,
    },
    registry::{
        OpenedCursor,
        Registry,
        SessionOf,
        TableOf,
    },
    scope::{
        TransactionScope,
        UpdateScope,
    },
};

/// A key and its value. The value is `None` when a missing value was stored.
pub type Record = (String, Option<String>);

/// Deletions per transaction when clearing a database.
const CLEAR_BATCH_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy)]
struct Columns {
    key: ColumnId,
    value: ColumnId,
}

struct OpenCursor<B: BackendInstanceBuilder> {
    session: SessionOf<B>,
    table: TableOf<B>,
}

/// A dictionary-style handle on one database.
///
/// A cursor owns its own session and table position and is meant for one
/// thread at a time; open one cursor per thread to share a database. Every
/// mutation takes the database's write lock, so writes through any cursor on
/// the same path are serialized.
///
/// Dropping a cursor closes it.
pub struct Cursor<B: BackendInstanceBuilder = Sqlite> {
    registry: Arc<Registry<B>>,
    database: Arc<SharedDatabase>,
    lazy_update: bool,
    columns: Columns,
    state: RefCell<Option<OpenCursor<B>>>,
}

impl<B: BackendInstanceBuilder> fmt::Debug for Cursor<B> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Cursor")
            .field("path", &self.database.path())
            .field("lazy_update", &self.lazy_update)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<B: BackendInstanceBuilder> Cursor<B> {
    pub(crate) fn new(registry: Arc<Registry<B>>, opened: OpenedCursor<B>, lazy_update: bool) -> Cursor<B> {
        Cursor {
            registry,
            database: opened.database,
            lazy_update,
            columns: Columns {
                key: opened.key_column,
                value: opened.value_column,
            },
            state: RefCell::new(Some(OpenCursor {
                session: opened.session,
                table: opened.table,
            })),
        }
    }

    pub fn path(&self) -> &Path {
        self.database.path()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Whether this cursor commits without waiting for the log to be flushed.
    pub fn is_lazy(&self) -> bool {
        self.lazy_update
    }

    fn commit_mode(&self) -> CommitMode {
        if self.lazy_update {
            CommitMode::Lazy
        } else {
            CommitMode::Full
        }
    }

    fn with_open<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SessionOf<B>, &mut TableOf<B>) -> Result<T, StoreError>,
    {
        let mut state = self.state.borrow_mut();
        let open = state.as_mut().ok_or(StoreError::CursorClosed)?;
        f(&open.session, &mut open.table)
    }

    /// Run `f` in a transaction.
    fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SessionOf<B>, &mut TableOf<B>) -> Result<T, StoreError>,
    {
        let mode = self.commit_mode();
        self.with_open(|session, table| TransactionScope::within(session, mode, |_| f(session, table)))
    }

    /// Run `f` in a transaction while holding the write lock. `f` also
    /// returns how many records it added (or removed, if negative), which is
    /// applied to the cached count once the transaction has committed.
    fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SessionOf<B>, &mut TableOf<B>) -> Result<(T, i64), StoreError>,
    {
        let mode = self.commit_mode();
        let database = &self.database;
        self.with_open(|session, table| {
            let _guard = database.lock_writes()?;
            let (value, delta) = TransactionScope::within(session, mode, |_| f(session, table))?;
            database.record_count.adjust(delta);
            Ok(value)
        })
    }

    /// Look up `key`, failing with `KeyNotFound` if it isn't there.
    pub fn get<K: ToKey>(&self, key: K) -> Result<Option<String>, StoreError> {
        let key = key.to_key();
        let value_column = self.columns.value;
        self.read(|session, table| {
            if !session.seek(table, &key, SeekMode::Equal).map_err(Into::into)? {
                return Err(StoreError::KeyNotFound(key.to_string()));
            }
            session.retrieve_column(table, value_column).map_err(Into::into)
        })
    }

    /// Store `value` under `key`, replacing any existing value.
    pub fn set<K: ToKey, V: ToValue>(&self, key: K, value: V) -> Result<(), StoreError> {
        let key = key.to_key();
        let value = value.to_value();
        let columns = self.columns;
        self.write(|session, table| {
            let kind = if session.seek(table, &key, SeekMode::Equal).map_err(Into::into)? {
                UpdateKind::Replace
            } else {
                UpdateKind::Insert
            };
            let mut update = UpdateScope::prepare(session, table, kind)?;
            if kind == UpdateKind::Insert {
                update.set_column(columns.key, Some(&*key))?;
            }
            update.set_column(columns.value, value.as_deref())?;
            update.apply()?;
            Ok(((), if kind == UpdateKind::Insert { 1 } else { 0 }))
        })
    }

    /// Remove `key`, failing with `KeyNotFound` if it isn't there.
    pub fn delete<K: ToKey>(&self, key: K) -> Result<(), StoreError> {
        let key = key.to_key();
        self.write(|session, table| {
            if !session.seek(table, &key, SeekMode::Equal).map_err(Into::into)? {
                return Err(StoreError::KeyNotFound(key.to_string()));
            }
            session.delete_current(table).map_err(Into::into)?;
            Ok(((), -1))
        })
    }

    #[doc(alias = "has_key")]
    pub fn contains<K: ToKey>(&self, key: K) -> Result<bool, StoreError> {
        let key = key.to_key();
        self.read(|session, table| session.seek(table, &key, SeekMode::Equal).map_err(Into::into))
    }

    /// The number of records. Counted by the engine the first time, then kept
    /// up to date by every write through any cursor on this database.
    pub fn len(&self) -> Result<u64, StoreError> {
        let mode = self.commit_mode();
        let database = &self.database;
        self.with_open(|session, table| {
            if let Some(count) = database.record_count.get() {
                return Ok(count);
            }

            // Only one thread counts; the others wait and take its result.
            let _guard = database.lock_writes()?;
            if let Some(count) = database.record_count.get() {
                return Ok(count);
            }
            let count = TransactionScope::within(session, mode, |_| {
                if !session.move_to(table, Move::First).map_err(Into::into)? {
                    return Ok(0);
                }
                session.index_record_count(table).map_err(Into::into)
            })?;
            debug!("Counted {} records in {:?}", count, database.path());
            database.record_count.set(count);
            Ok(count)
        })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// The record with the lowest key.
    pub fn first(&self) -> Result<Record, StoreError> {
        self.move_and_read(Move::First, || StoreError::DatabaseEmpty)
    }

    /// The record with the highest key.
    pub fn last(&self) -> Result<Record, StoreError> {
        self.move_and_read(Move::Last, || StoreError::DatabaseEmpty)
    }

    /// The record after the current position. A newly opened cursor sits
    /// before the first record.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Result<Record, StoreError> {
        self.move_and_read(Move::Next, || StoreError::EndOfDatabase)
    }

    pub fn previous(&self) -> Result<Record, StoreError> {
        self.move_and_read(Move::Previous, || StoreError::EndOfDatabase)
    }

    fn move_and_read<E>(&self, to: Move, missing: E) -> Result<Record, StoreError>
    where
        E: FnOnce() -> StoreError,
    {
        let columns = self.columns;
        self.read(|session, table| {
            if !session.move_to(table, to).map_err(Into::into)? {
                return Err(missing());
            }
            read_record(session, table, columns, true)
        })
    }

    /// Position the cursor on `key`, or on the first key after it if it isn't
    /// there, and return that record.
    pub fn set_location<K: ToKey>(&self, key: K) -> Result<Record, StoreError> {
        let key = key.to_key();
        let columns = self.columns;
        self.read(|session, table| {
            if !session.seek(table, &key, SeekMode::GreaterOrEqual).map_err(Into::into)? {
                return Err(StoreError::NoMatchingKey(key.to_string()));
            }
            read_record(session, table, columns, true)
        })
    }

    /// Fetch the record that follows `after` in key order, or the first record
    /// if `after` is `None`. One transaction per call.
    pub(crate) fn record_after(&self, after: Option<&str>, with_value: bool) -> Result<Option<Record>, StoreError> {
        let columns = self.columns;
        self.read(|session, table| {
            let found = match after {
                None => session.move_to(table, Move::First).map_err(Into::into)?,
                Some(after) => {
                    if !session.seek(table, after, SeekMode::GreaterOrEqual).map_err(Into::into)? {
                        false
                    } else if session.retrieve_column(table, columns.key).map_err(Into::into)?.as_deref() == Some(after) {
                        session.move_to(table, Move::Next).map_err(Into::into)?
                    } else {
                        true
                    }
                },
            };
            if !found {
                return Ok(None);
            }
            read_record(session, table, columns, with_value).map(Some)
        })
    }

    /// Records in ascending key order, fetched one transaction at a time.
    ///
    /// No transaction is open between items, so the caller may use or close
    /// this cursor while iterating. Records written ahead of the iterator
    /// are seen, and deleting the record just returned is safe.
    pub fn iter(&self) -> Result<Iter<'_, B>, StoreError> {
        if !self.is_open() {
            return Err(StoreError::CursorClosed);
        }
        Ok(Iter::new(self, true))
    }

    pub fn iter_keys(&self) -> Result<Keys<'_, B>, StoreError> {
        if !self.is_open() {
            return Err(StoreError::CursorClosed);
        }
        Ok(Keys::new(Iter::new(self, false)))
    }

    pub fn iter_values(&self) -> Result<Values<'_, B>, StoreError> {
        self.iter().map(Values::new)
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.iter_keys()?.collect()
    }

    pub fn values(&self) -> Result<Vec<Option<String>>, StoreError> {
        self.iter_values()?.collect()
    }

    pub fn items(&self) -> Result<Vec<Record>, StoreError> {
        self.iter()?.collect()
    }

    /// Delete every record, committing after each batch of deletions.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mode = self.commit_mode();
        let database = &self.database;
        self.with_open(|session, table| {
            let _guard = database.lock_writes()?;
            loop {
                let deleted = TransactionScope::within(session, mode, |_| {
                    let mut deleted = 0;
                    session.move_to(table, Move::BeforeFirst).map_err(Into::into)?;
                    while deleted < CLEAR_BATCH_SIZE && session.move_to(table, Move::Next).map_err(Into::into)? {
                        session.delete_current(table).map_err(Into::into)?;
                        deleted += 1;
                    }
                    Ok(deleted)
                })?;
                database.record_count.adjust(-(deleted as i64));
                trace!("Cleared {} records from {:?}", deleted, database.path());
                if deleted < CLEAR_BATCH_SIZE {
                    break;
                }
            }
            database.record_count.set(0);
            Ok(())
        })
    }

    /// Close the cursor, releasing its session. Does nothing if it is already
    /// closed; every other operation fails with `CursorClosed` afterwards.
    pub fn close(&self) -> Result<(), StoreError> {
        let open = match self.state.borrow_mut().take() {
            Some(open) => open,
            None => return Ok(()),
        };

        let OpenCursor {
            session,
            table,
        } = open;
        let closed = session.close_table(table).map_err(Into::into);
        let ended = session.end().map_err(Into::into);
        let released = self.registry.close_cursor(&self.database);
        closed.and(ended).and(released)
    }
}

impl<B: BackendInstanceBuilder> Drop for Cursor<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close cursor on {:?}: {}", self.database.path(), e);
        }
    }
}

fn read_record<S: BackendSession>(
    session: &S,
    table: &S::Table,
    columns: Columns,
    with_value: bool,
) -> Result<Record, StoreError> {
    let key = session.retrieve_column(table, columns.key).map_err(Into::into)?;
    let value = if with_value {
        session.retrieve_column(table, columns.value).map_err(Into::into)?
    } else {
        None
    };
    Ok((key.unwrap_or_else(|| NONE_KEY.to_owned()), value))
}

#[cfg(test)]
mod tests {
    use tempfile::Builder;

    use super::*;
    use crate::mode::OpenMode;

    #[test]
    fn test_position_persists() {
        let root = Builder::new().prefix("test_position_persists").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let cursor = registry.open(root.path().join("test.db"), OpenMode::New, false).expect("opened");
        for key in &["b", "a", "c"] {
            cursor.set(*key, key.to_uppercase()).expect("set");
        }

        assert_eq!(cursor.set_location("a").expect("located"), ("a".to_owned(), Some("A".to_owned())));
        assert_eq!(cursor.next().expect("next").0, "b");
        assert_eq!(cursor.next().expect("next").0, "c");
        match cursor.next() {
            Err(StoreError::EndOfDatabase) => {},
            other => panic!("expected EndOfDatabase, got {:?}", other),
        }
        assert_eq!(cursor.previous().expect("previous").0, "c");
        assert_eq!(cursor.last().expect("last").0, "c");
        assert_eq!(cursor.first().expect("first").0, "a");
        match cursor.previous() {
            Err(StoreError::EndOfDatabase) => {},
            other => panic!("expected EndOfDatabase, got {:?}", other),
        }
    }

    #[test]
    fn test_count_follows_commits() {
        let root = Builder::new().prefix("test_count_follows_commits").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let cursor = registry.open(root.path().join("test.db"), OpenMode::New, true).expect("opened");
        assert_eq!(cursor.database.record_count.get(), Some(0));

        cursor.set("a", "1").expect("set");
        cursor.set("a", "2").expect("replaced");
        cursor.set("b", "3").expect("set");
        assert_eq!(cursor.database.record_count.get(), Some(2));

        assert!(cursor.delete("missing").is_err());
        assert_eq!(cursor.database.record_count.get(), Some(2));

        cursor.delete("a").expect("deleted");
        assert_eq!(cursor.len().expect("len"), 1);
        assert!(!cursor.is_empty().expect("is_empty"));
    }

    #[test]
    fn test_clear_in_batches() {
        let root = Builder::new().prefix("test_clear_in_batches").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let cursor = registry.open(root.path().join("test.db"), OpenMode::New, true).expect("opened");
        for i in 0..250u32 {
            cursor.set(format!("{:04}", i), i).expect("set");
        }
        assert_eq!(cursor.len().expect("len"), 250);

        cursor.clear().expect("cleared");
        assert_eq!(cursor.len().expect("len"), 0);
        assert!(cursor.is_empty().expect("is_empty"));
        match cursor.first() {
            Err(StoreError::DatabaseEmpty) => {},
            other => panic!("expected DatabaseEmpty, got {:?}", other),
        }
        cursor.clear().expect("cleared again");
    }

    #[test]
    fn test_debug() {
        let root = Builder::new().prefix("test_debug").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let cursor = registry.open(root.path().join("test.db"), OpenMode::New, false).expect("opened");
        assert!(format!("{:?}", cursor).contains("open: true"));
        cursor.close().expect("closed");
        assert!(format!("{:?}", cursor).contains("open: false"));
    }
}

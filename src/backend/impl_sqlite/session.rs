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
    cell::Cell,
    fs,
    io,
    path::Path,
    sync::Arc,
};

use log::{
    debug,
    warn,
};
use rusqlite::{
    params,
    Connection,
    OpenFlags,
};

use super::{
    instance::Settings,
    run_pragma,
    ErrorImpl,
    TableImpl,
};
use crate::backend::{
    common::{
        AttachFlags,
        ColumnFlags,
        ColumnId,
        CommitMode,
        CreateDatabaseFlags,
        IndexFlags,
        Move,
        SeekMode,
        UpdateKind,
    },
    traits::BackendSession,
};

#[derive(Debug)]
pub struct SessionImpl {
    settings: Arc<Settings>,
    connection: Option<Connection>,
    read_only: bool,
    in_transaction: Cell<bool>,
    durability: Cell<Option<CommitMode>>,
    // Counts this session against its instance until the session is dropped.
    _live: Arc<()>,
}

impl SessionImpl {
    pub(crate) fn new(settings: Arc<Settings>, live: Arc<()>) -> SessionImpl {
        SessionImpl {
            settings,
            connection: None,
            read_only: false,
            in_transaction: Cell::new(false),
            durability: Cell::new(None),
            _live: live,
        }
    }

    fn connection(&self) -> Result<&Connection, ErrorImpl> {
        self.connection.as_ref().ok_or(ErrorImpl::NotAttached)
    }

    fn configure(&self, connection: &Connection, read_only: bool) -> Result<(), ErrorImpl> {
        connection.busy_timeout(self.settings.busy_timeout)?;
        run_pragma(connection, &format!("PRAGMA cache_size = {}", self.settings.cache_size))?;
        if !read_only {
            run_pragma(connection, &format!("PRAGMA journal_size_limit = {}", self.settings.journal_size_limit))?;
            run_pragma(connection, &format!("PRAGMA wal_autocheckpoint = {}", self.settings.auto_checkpoint))?;
        }
        Ok(())
    }

    fn close_connection(&mut self) -> Result<(), ErrorImpl> {
        if self.in_transaction.get() {
            self.rollback_transaction()?;
        }
        self.durability.set(None);
        match self.connection.take() {
            Some(connection) => connection.close().map_err(|(_, e)| ErrorImpl::SqliteError(e)),
            None => Ok(()),
        }
    }
}

impl BackendSession for SessionImpl {
    type Error = ErrorImpl;
    type Table = TableImpl;

    fn create_database(&mut self, path: &Path, flags: CreateDatabaseFlags) -> Result<(), ErrorImpl> {
        self.close_connection()?;
        if path.exists() {
            if !flags.contains(CreateDatabaseFlags::OVERWRITE_EXISTING) {
                return Err(ErrorImpl::IoError(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("database {:?} already exists", path),
                )));
            }
            fs::remove_file(path)?;
        }

        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // The page size only takes effect while the file is still empty, and
        // switching to WAL mode writes the header that fixes it for good.
        run_pragma(&connection, &format!("PRAGMA page_size = {}", self.settings.page_size))?;
        let journal_mode: String = connection.query_row("PRAGMA journal_mode = WAL", params![], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!("Database {:?} stays in {} journal mode", path, journal_mode);
        }
        let page_size: i64 = connection.query_row("PRAGMA page_size", params![], |row| row.get(0))?;
        if !self.settings.valid_page_size() || page_size != i64::from(self.settings.page_size) {
            return Err(ErrorImpl::InvalidConfiguration(format!(
                "page size {} was not accepted",
                self.settings.page_size
            )));
        }

        self.configure(&connection, false)?;
        debug!("Created database {:?}", path);
        self.connection = Some(connection);
        self.read_only = false;
        Ok(())
    }

    fn attach_database(&mut self, path: &Path, flags: AttachFlags) -> Result<(), ErrorImpl> {
        self.close_connection()?;
        if !path.is_file() {
            return Err(ErrorImpl::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("database {:?} does not exist", path),
            )));
        }

        let read_only = flags.contains(AttachFlags::READ_ONLY);
        let access = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let connection = Connection::open_with_flags(path, access | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        self.configure(&connection, read_only)?;
        // Fails early when the file is not a database at all.
        run_pragma(&connection, "PRAGMA schema_version")?;

        self.connection = Some(connection);
        self.read_only = read_only;
        Ok(())
    }

    fn detach_database(&mut self) -> Result<(), ErrorImpl> {
        self.close_connection()
    }

    fn create_table(&self, name: &str) -> Result<TableImpl, ErrorImpl> {
        TableImpl::create(self.connection()?, name)
    }

    fn open_table(&self, name: &str) -> Result<TableImpl, ErrorImpl> {
        TableImpl::open(self.connection()?, name)
    }

    fn close_table(&self, table: TableImpl) -> Result<(), ErrorImpl> {
        if table.has_pending_update() {
            warn!("Closing table {} with a prepared update; the update is discarded", table.name());
        }
        Ok(())
    }

    fn add_column(&self, table: &mut TableImpl, name: &str, flags: ColumnFlags) -> Result<ColumnId, ErrorImpl> {
        table.add_column(self.connection()?, name, flags)
    }

    fn create_index(&self, table: &mut TableImpl, name: &str, column: &str, flags: IndexFlags) -> Result<(), ErrorImpl> {
        table.create_index(self.connection()?, name, column, flags)
    }

    fn column_id(&self, table: &TableImpl, name: &str) -> Result<ColumnId, ErrorImpl> {
        table.column_id(name)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    fn begin_transaction(&self, mode: CommitMode) -> Result<(), ErrorImpl> {
        if self.in_transaction.get() {
            return Err(ErrorImpl::TransactionAlreadyActive);
        }
        let connection = self.connection()?;
        // The flush policy can only be changed between transactions.
        if !self.read_only && self.durability.get() != Some(mode) {
            let level = match mode {
                CommitMode::Full => "FULL",
                CommitMode::Lazy => "NORMAL",
            };
            connection.execute_batch(&format!("PRAGMA synchronous = {}", level))?;
            self.durability.set(Some(mode));
        }
        connection.execute_batch("BEGIN DEFERRED")?;
        self.in_transaction.set(true);
        Ok(())
    }

    fn commit_transaction(&self) -> Result<(), ErrorImpl> {
        if !self.in_transaction.get() {
            return Err(ErrorImpl::NoActiveTransaction);
        }
        let connection = self.connection()?;
        match connection.execute_batch("COMMIT") {
            Ok(()) => {
                self.in_transaction.set(false);
                Ok(())
            },
            Err(e) => {
                // Some failures roll the transaction back on their own; the
                // rest leave it open for the caller to roll back.
                if connection.is_autocommit() {
                    self.in_transaction.set(false);
                }
                Err(e.into())
            },
        }
    }

    fn rollback_transaction(&self) -> Result<(), ErrorImpl> {
        if !self.in_transaction.get() {
            return Err(ErrorImpl::NoActiveTransaction);
        }
        self.in_transaction.set(false);
        let connection = self.connection()?;
        if !connection.is_autocommit() {
            connection.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn seek(&self, table: &mut TableImpl, key: &str, mode: SeekMode) -> Result<bool, ErrorImpl> {
        table.seek(self.connection()?, key, mode)
    }

    fn move_to(&self, table: &mut TableImpl, to: Move) -> Result<bool, ErrorImpl> {
        table.move_to(self.connection()?, to)
    }

    fn retrieve_column(&self, table: &TableImpl, column: ColumnId) -> Result<Option<String>, ErrorImpl> {
        table.retrieve_column(self.connection()?, column)
    }

    fn prepare_update(&self, table: &mut TableImpl, kind: UpdateKind) -> Result<(), ErrorImpl> {
        table.prepare_update(kind)
    }

    fn set_column(&self, table: &mut TableImpl, column: ColumnId, value: Option<&str>) -> Result<(), ErrorImpl> {
        table.set_column(column, value)
    }

    fn apply_update(&self, table: &mut TableImpl) -> Result<(), ErrorImpl> {
        table.apply_update(self.connection()?)
    }

    fn cancel_update(&self, table: &mut TableImpl) -> Result<(), ErrorImpl> {
        table.cancel_update()
    }

    fn delete_current(&self, table: &mut TableImpl) -> Result<(), ErrorImpl> {
        table.delete_current(self.connection()?)
    }

    fn index_record_count(&self, table: &TableImpl) -> Result<u64, ErrorImpl> {
        table.record_count(self.connection()?)
    }

    fn end(mut self) -> Result<(), ErrorImpl> {
        self.close_connection()
    }
}

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
    io,
    path::PathBuf,
    sync::PoisonError,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key '{0}' was not found")]
    KeyNotFound(String),

    #[error("database is empty")]
    DatabaseEmpty,

    #[error("end of database")]
    EndOfDatabase,

    #[error("no key matching '{0}' was found")]
    NoMatchingKey(String),

    #[error("cursor is closed")]
    CursorClosed,

    #[error("invalid open mode: {0:?}")]
    InvalidOpenMode(String),

    #[error("database {0:?} is open by other cursors")]
    DatabaseInUse(PathBuf),

    #[error("directory does not exist or not a directory: {0:?}")]
    DirectoryDoesNotExistError(PathBuf),

    #[error("not a database file path: {0:?}")]
    InvalidPath(PathBuf),

    #[error("a transaction is already active on this session")]
    TransactionAlreadyActive,

    #[error("no transaction is active on this session")]
    NoActiveTransaction,

    #[error("an update is already prepared on this table")]
    UpdateAlreadyPrepared,

    #[error("no update is prepared on this table")]
    NoPreparedUpdate,

    #[error("no current record")]
    NoCurrentRecord,

    #[error("no database is attached to this session")]
    DatabaseNotAttached,

    #[error("unexpected database schema: {0}")]
    SchemaMismatch(String),

    #[error("invalid engine configuration: {0}")]
    InvalidConfiguration(String),

    #[error("engine instance {0:?} is not initialized")]
    InstanceNotInitialized(String),

    #[error("lock poisoned")]
    LockPoisonError,

    #[error("I/O error: {0:?}")]
    IoError(#[from] io::Error),

    #[error("sqlite error: {0:?}")]
    SqliteError(rusqlite::Error),
}

impl StoreError {
    /// Whether this is one of the expected "not found" outcomes: a missing key,
    /// an empty database, the end of the table, or no key at or above a probe.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            StoreError::KeyNotFound(_) | StoreError::DatabaseEmpty | StoreError::EndOfDatabase | StoreError::NoMatchingKey(_)
        )
    }
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> StoreError {
        StoreError::LockPoisonError
    }
}

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
    fmt::{
        Debug,
        Display,
    },
    path::{
        Path,
        PathBuf,
    },
};

use crate::{
    backend::common::{
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
    error::StoreError,
};

pub trait BackendError: Debug + Display + Into<StoreError> {}

pub trait BackendInstanceBuilder: Debug + Clone + Send + Sync + 'static {
    type Error: BackendError;
    type Instance: BackendInstance<Error = Self::Error>;

    fn new() -> Self;

    fn set_log_dir<P>(&mut self, dir: P) -> &mut Self
    where
        P: Into<PathBuf>;

    /// Size of a single transaction log file, in KiB.
    fn set_log_file_size(&mut self, kib: u32) -> &mut Self;

    fn set_circular_log(&mut self, circular: bool) -> &mut Self;

    fn set_page_size(&mut self, bytes: u32) -> &mut Self;

    fn set_cache_size_min(&mut self, pages: u32) -> &mut Self;

    fn set_cache_size_max(&mut self, pages: u32) -> &mut Self;

    /// Create an uninitialized instance called `name`, keeping its system files
    /// in `dir`.
    fn create(&self, name: &str, dir: &Path) -> Result<Self::Instance, Self::Error>;
}

pub trait BackendInstance: Debug + Send + 'static {
    type Error: BackendError;
    type Session: BackendSession<Error = Self::Error>;

    fn name(&self) -> &str;

    fn init(&mut self) -> Result<(), Self::Error>;

    fn begin_session(&self) -> Result<Self::Session, Self::Error>;

    /// Every file the engine keeps for the database at `path`: the data file
    /// followed by its log and checkpoint files.
    fn database_files(&self, path: &Path) -> Vec<PathBuf>;

    fn terminate(self) -> Result<(), Self::Error>;
}

/// One logical connection to an engine instance. A session is used by one
/// thread at a time; the tables opened through it carry their own position.
pub trait BackendSession: Debug + Send + Sized {
    type Error: BackendError;
    type Table: Debug + Send;

    fn create_database(&mut self, path: &Path, flags: CreateDatabaseFlags) -> Result<(), Self::Error>;

    fn attach_database(&mut self, path: &Path, flags: AttachFlags) -> Result<(), Self::Error>;

    fn detach_database(&mut self) -> Result<(), Self::Error>;

    fn create_table(&self, name: &str) -> Result<Self::Table, Self::Error>;

    fn open_table(&self, name: &str) -> Result<Self::Table, Self::Error>;

    fn close_table(&self, table: Self::Table) -> Result<(), Self::Error>;

    fn add_column(&self, table: &mut Self::Table, name: &str, flags: ColumnFlags) -> Result<ColumnId, Self::Error>;

    fn create_index(&self, table: &mut Self::Table, name: &str, column: &str, flags: IndexFlags) -> Result<(), Self::Error>;

    fn column_id(&self, table: &Self::Table, name: &str) -> Result<ColumnId, Self::Error>;

    fn in_transaction(&self) -> bool;

    /// Begin a transaction whose commit will be flushed according to `mode`.
    fn begin_transaction(&self, mode: CommitMode) -> Result<(), Self::Error>;

    fn commit_transaction(&self) -> Result<(), Self::Error>;

    fn rollback_transaction(&self) -> Result<(), Self::Error>;

    /// Position `table` on the record matching `key` under `mode`. Returns
    /// `false` when there is no such record.
    fn seek(&self, table: &mut Self::Table, key: &str, mode: SeekMode) -> Result<bool, Self::Error>;

    /// Move `table` relative to its current position. Returns `false` when
    /// the move runs off either end of the index.
    fn move_to(&self, table: &mut Self::Table, to: Move) -> Result<bool, Self::Error>;

    fn retrieve_column(&self, table: &Self::Table, column: ColumnId) -> Result<Option<String>, Self::Error>;

    fn prepare_update(&self, table: &mut Self::Table, kind: UpdateKind) -> Result<(), Self::Error>;

    fn set_column(&self, table: &mut Self::Table, column: ColumnId, value: Option<&str>) -> Result<(), Self::Error>;

    fn apply_update(&self, table: &mut Self::Table) -> Result<(), Self::Error>;

    fn cancel_update(&self, table: &mut Self::Table) -> Result<(), Self::Error>;

    fn delete_current(&self, table: &mut Self::Table) -> Result<(), Self::Error>;

    fn index_record_count(&self, table: &Self::Table) -> Result<u64, Self::Error>;

    fn end(self) -> Result<(), Self::Error>;
}

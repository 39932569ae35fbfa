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
    collections::{
        btree_map::Entry,
        BTreeMap,
    },
    fs,
    io,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
    },
};

use lazy_static::lazy_static;
use log::{
    debug,
    warn,
};

use crate::{
    backend::{
        BackendInstance,
        BackendInstanceBuilder,
        BackendSession,
        ColumnFlags,
        ColumnId,
        CommitMode,
        CreateDatabaseFlags,
        IndexFlags,
        Sqlite,
    },
    cursor::Cursor,
    database::{
        SharedDatabase,
        KEY_COLUMN,
        KEY_INDEX,
        TABLE_NAME,
        VALUE_COLUMN,
    },
    error::StoreError,
    mode::OpenMode,
    scope::TransactionScope,
};

pub(crate) type SessionOf<B> = <<B as BackendInstanceBuilder>::Instance as BackendInstance>::Session;
pub(crate) type TableOf<B> = <SessionOf<B> as BackendSession>::Table;

lazy_static! {
    static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());
}

/// The open databases of this process, keyed by absolute path.
///
/// A path has at most one database handle, and therefore one engine instance,
/// no matter how many cursors are open on it. The handle goes away with the
/// last of its cursors.
#[derive(Debug)]
pub struct Registry<B: BackendInstanceBuilder = Sqlite> {
    builder: B,
    state: Mutex<RegistryState<B>>,
}

#[derive(Debug)]
struct RegistryState<B: BackendInstanceBuilder> {
    databases: BTreeMap<PathBuf, DatabaseHandle<B>>,
    next_instance_id: u64,
}

impl Registry<Sqlite> {
    /// A registry whose engine instances use the default configuration.
    pub fn new() -> Registry<Sqlite> {
        Registry::with_builder(Sqlite::new())
    }

    /// The process-wide default registry.
    pub fn singleton() -> &'static Arc<Registry<Sqlite>> {
        &*REGISTRY
    }
}

impl Default for Registry<Sqlite> {
    fn default() -> Registry<Sqlite> {
        Registry::new()
    }
}

impl<B: BackendInstanceBuilder> Registry<B> {
    /// A registry whose engine instances are all created from `builder`.
    pub fn with_builder(builder: B) -> Registry<B> {
        Registry {
            builder,
            state: Mutex::new(RegistryState {
                databases: BTreeMap::new(),
                next_instance_id: 0,
            }),
        }
    }

    /// Open a cursor on the database at `path`.
    ///
    /// The directory containing `path` must already exist. With `lazy_update`
    /// set, the cursor's commits don't wait for the log to reach the disk.
    pub fn open<P>(self: &Arc<Self>, path: P, mode: OpenMode, lazy_update: bool) -> Result<Cursor<B>, StoreError>
    where
        P: AsRef<Path>,
    {
        let path = canonicalize_path(path.as_ref())?;

        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        let handle = match state.databases.entry(path.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let instance_name = format!("shelf_instance_{}", state.next_instance_id);
                state.next_instance_id += 1;
                e.insert(DatabaseHandle::new(path.clone(), instance_name))
            },
        };

        match handle.open_cursor(&self.builder, mode) {
            Ok(opened) => {
                debug!("Opened cursor on {:?} ({}), {} open", path, mode, handle.cursor_count);
                Ok(Cursor::new(self.clone(), opened, lazy_update))
            },
            Err(e) => {
                if handle.cursor_count == 0 {
                    if let Some(handle) = state.databases.remove(&path) {
                        if let Err(terminate) = handle.terminate() {
                            warn!("Failed to terminate instance for {:?}: {}", path, terminate);
                        }
                    }
                }
                Err(e)
            },
        }
    }

    /// Release a cursor's hold on its database, dropping the database handle
    /// and terminating its instance if it was the last one.
    pub(crate) fn close_cursor(&self, database: &Arc<SharedDatabase>) -> Result<(), StoreError> {
        let path = database.path();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(e) => {
                // The handle keeps its count, so its instance is never terminated.
                warn!("Registry lock poisoned, leaking the instance for {:?}", path);
                return Err(e.into());
            },
        };
        let remaining = match state.databases.get_mut(path) {
            Some(handle) if Arc::ptr_eq(&handle.shared, database) => {
                handle.cursor_count = handle.cursor_count.saturating_sub(1);
                handle.cursor_count
            },
            _ => {
                warn!("Closing cursor on {:?}, which is not registered", path);
                return Ok(());
            },
        };
        debug!("Closed cursor on {:?}, {} open", path, remaining);

        if remaining == 0 {
            if let Some(handle) = state.databases.remove(path) {
                handle.terminate()?;
            }
        }
        Ok(())
    }

    /// The number of cursors open on `path`.
    pub fn open_cursors<P>(&self, path: P) -> Result<usize, StoreError>
    where
        P: AsRef<Path>,
    {
        let path = canonicalize_path(path.as_ref())?;
        let state = self.state.lock()?;
        Ok(state.databases.get(&path).map_or(0, |handle| handle.cursor_count))
    }

    /// Paths of every database with at least one open cursor, in order.
    pub fn open_databases(&self) -> Result<Vec<PathBuf>, StoreError> {
        let state = self.state.lock()?;
        Ok(state.databases.keys().cloned().collect())
    }
}

/// What a cursor is made of once its database has been opened.
pub(crate) struct OpenedCursor<B: BackendInstanceBuilder> {
    pub(crate) database: Arc<SharedDatabase>,
    pub(crate) session: SessionOf<B>,
    pub(crate) table: TableOf<B>,
    pub(crate) key_column: ColumnId,
    pub(crate) value_column: ColumnId,
}

/// One open database file. Only touched while the registry is locked.
#[derive(Debug)]
struct DatabaseHandle<B: BackendInstanceBuilder> {
    instance_name: String,
    instance: Option<B::Instance>,
    cursor_count: usize,
    shared: Arc<SharedDatabase>,
}

impl<B: BackendInstanceBuilder> DatabaseHandle<B> {
    fn new(path: PathBuf, instance_name: String) -> DatabaseHandle<B> {
        DatabaseHandle {
            instance_name,
            instance: None,
            cursor_count: 0,
            shared: Arc::new(SharedDatabase::new(path)),
        }
    }

    fn path(&self) -> &Path {
        self.shared.path()
    }

    fn open_cursor(&mut self, builder: &B, mode: OpenMode) -> Result<OpenedCursor<B>, StoreError> {
        if mode == OpenMode::New && self.cursor_count > 0 {
            return Err(StoreError::DatabaseInUse(self.path().to_path_buf()));
        }

        if self.instance.is_none() {
            self.instance = Some(self.create_instance(builder)?);
        }

        let path = self.path().to_path_buf();
        let files = self.instance()?.database_files(&path);
        let create = match mode {
            OpenMode::New => {
                remove_files(&files)?;
                true
            },
            OpenMode::Create => !path.exists(),
            OpenMode::ReadOnly | OpenMode::ReadWrite => false,
        };

        if create {
            if let Err(e) = self.create_database() {
                warn!("Failed to create database {:?}: {}", path, e);
                if self.cursor_count == 0 {
                    if let Some(instance) = self.instance.take() {
                        if let Err(terminate) = instance.terminate() {
                            warn!("Failed to terminate instance {}: {}", self.instance_name, terminate);
                        }
                    }
                }
                if let Err(remove) = remove_files(&files) {
                    warn!("Failed to remove partial database {:?}: {}", path, remove);
                }
                return Err(e);
            }
            self.shared.record_count.set(0);
        }

        let instance = self.instance()?;
        let mut session = instance.begin_session().map_err(Into::into)?;
        session.attach_database(&path, mode.attach_flags()).map_err(Into::into)?;
        let table = session.open_table(TABLE_NAME).map_err(Into::into)?;
        let key_column = session.column_id(&table, KEY_COLUMN).map_err(Into::into)?;
        let value_column = session.column_id(&table, VALUE_COLUMN).map_err(Into::into)?;

        self.cursor_count += 1;
        Ok(OpenedCursor {
            database: self.shared.clone(),
            session,
            table,
            key_column,
            value_column,
        })
    }

    fn instance(&self) -> Result<&B::Instance, StoreError> {
        self.instance.as_ref().ok_or_else(|| StoreError::InstanceNotInitialized(self.instance_name.clone()))
    }

    fn create_instance(&self, builder: &B) -> Result<B::Instance, StoreError> {
        let dir = self.path().parent().unwrap_or_else(|| Path::new("."));
        let mut instance = builder.create(&self.instance_name, dir).map_err(Into::into)?;
        if let Err(e) = instance.init() {
            if let Err(terminate) = instance.terminate() {
                warn!("Failed to terminate instance {}: {}", self.instance_name, terminate);
            }
            return Err(e.into());
        }
        Ok(instance)
    }

    /// Create the database file with its single table, the key and value
    /// columns and the unique index on the key.
    fn create_database(&self) -> Result<(), StoreError> {
        let instance = self.instance()?;
        let mut session = instance.begin_session().map_err(Into::into)?;
        session.create_database(self.path(), CreateDatabaseFlags::OVERWRITE_EXISTING).map_err(Into::into)?;

        TransactionScope::within(&session, CommitMode::Lazy, |txn| {
            let session = txn.session();
            let mut table = session.create_table(TABLE_NAME).map_err(Into::into)?;
            session.add_column(&mut table, KEY_COLUMN, ColumnFlags::COMPRESSED).map_err(Into::into)?;
            session.add_column(&mut table, VALUE_COLUMN, ColumnFlags::COMPRESSED).map_err(Into::into)?;
            session
                .create_index(&mut table, KEY_INDEX, KEY_COLUMN, IndexFlags::UNIQUE | IndexFlags::PRIMARY)
                .map_err(Into::into)?;
            session.close_table(table).map_err(Into::into)
        })?;

        session.detach_database().map_err(Into::into)?;
        session.end().map_err(Into::into)?;
        debug!("Created database {:?}", self.path());
        Ok(())
    }

    fn terminate(self) -> Result<(), StoreError> {
        match self.instance {
            Some(instance) => instance.terminate().map_err(Into::into),
            None => Ok(()),
        }
    }
}

/// Delete a database's data and log files, ignoring any that don't exist.
fn remove_files(files: &[PathBuf]) -> Result<(), StoreError> {
    for file in files {
        match fs::remove_file(file) {
            Ok(()) => debug!("Removed {:?}", file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// The registry key for `path`: its parent directory resolved to an absolute
/// path, joined with its file name.
fn canonicalize_path(path: &Path) -> Result<PathBuf, StoreError> {
    let file_name = match path.file_name() {
        Some(name) if !path.is_dir() => name,
        _ => return Err(StoreError::InvalidPath(path.to_path_buf())),
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(StoreError::DirectoryDoesNotExistError(parent.to_path_buf()));
    }

    let dir = if cfg!(feature = "no-canonicalize-path") {
        if parent.is_absolute() {
            parent.to_path_buf()
        } else {
            std::env::current_dir()?.join(parent)
        }
    } else {
        parent.canonicalize()?
    };
    Ok(dir.join(file_name))
}

#[cfg(test)]
mod tests {
    use tempfile::Builder;

    use super::*;

    #[test]
    fn test_canonicalize_path() {
        let root = Builder::new().prefix("test_canonicalize_path").tempdir().expect("tempdir");
        fs::create_dir(root.path().join("sub")).expect("dir created");

        let direct = canonicalize_path(&root.path().join("test.db")).expect("path");
        let dotted = canonicalize_path(&root.path().join("sub").join("..").join("test.db")).expect("path");
        assert_eq!(direct, dotted);
        assert!(direct.is_absolute());

        match canonicalize_path(&root.path().join("missing").join("test.db")) {
            Err(StoreError::DirectoryDoesNotExistError(_)) => {},
            other => panic!("expected DirectoryDoesNotExistError, got {:?}", other),
        }
        match canonicalize_path(&root.path().join("sub")) {
            Err(StoreError::InvalidPath(_)) => {},
            other => panic!("expected InvalidPath, got {:?}", other),
        }
    }

    #[test]
    fn test_instance_names_are_unique() {
        let root = Builder::new().prefix("test_instance_names_are_unique").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());

        let a = registry.open(root.path().join("a.db"), OpenMode::Create, false).expect("opened");
        let b = registry.open(root.path().join("b.db"), OpenMode::Create, false).expect("opened");
        {
            let state = registry.state.lock().expect("lock");
            let names: Vec<&str> = state.databases.values().map(|handle| handle.instance_name.as_str()).collect();
            assert_eq!(names, vec!["shelf_instance_0", "shelf_instance_1"]);
            assert!(state.databases.values().all(|handle| handle.instance.is_some()));
        }

        a.close().expect("closed");
        b.close().expect("closed");
        let again = registry.open(root.path().join("a.db"), OpenMode::Create, false).expect("opened");
        {
            let state = registry.state.lock().expect("lock");
            let handle = state.databases.values().next().expect("handle");
            assert_eq!(handle.instance_name, "shelf_instance_2");
        }
        drop(again);
        assert!(registry.open_databases().expect("databases").is_empty());
    }

    #[test]
    fn test_shared_handle() {
        let root = Builder::new().prefix("test_shared_handle").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let path = root.path().join("shared.db");

        let first = registry.open(&path, OpenMode::Create, false).expect("opened");
        let second = registry.open(&path, OpenMode::ReadWrite, true).expect("opened");
        assert_eq!(registry.open_cursors(&path).expect("count"), 2);
        {
            let state = registry.state.lock().expect("lock");
            assert_eq!(state.databases.len(), 1);
        }

        first.close().expect("closed");
        assert_eq!(registry.open_cursors(&path).expect("count"), 1);
        second.close().expect("closed");
        assert_eq!(registry.open_cursors(&path).expect("count"), 0);
        assert!(registry.open_databases().expect("databases").is_empty());
    }

    #[test]
    fn test_close_with_poisoned_registry() {
        let root = Builder::new().prefix("test_close_with_poisoned_registry").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let path = root.path().join("test.db");
        let cursor = registry.open(&path, OpenMode::Create, false).expect("opened");

        let poisoner = registry.clone();
        let result = std::thread::spawn(move || {
            let _state = poisoner.state.lock().expect("lock");
            panic!("poisoning the registry");
        })
        .join();
        assert!(result.is_err());

        match cursor.close() {
            Err(StoreError::LockPoisonError) => {},
            other => panic!("expected LockPoisonError, got {:?}", other),
        }
        assert!(!cursor.is_open());
        cursor.close().expect("closed again");
    }
}

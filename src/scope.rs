// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Guards that pair a begin with its end on every exit path: a transaction is
//! rolled back and a prepared update is cancelled unless explicitly finished.

use log::{
    debug,
    warn,
};

use crate::{
    backend::{
        BackendSession,
        ColumnId,
        CommitMode,
        UpdateKind,
    },
    error::StoreError,
};

#[derive(Debug)]
pub struct TransactionScope<'s, S: BackendSession> {
    session: &'s S,
    active: bool,
}

impl<'s, S: BackendSession> TransactionScope<'s, S> {
    /// Begin a transaction on `session`. Fails if one is already active there.
    pub fn begin(session: &'s S, mode: CommitMode) -> Result<TransactionScope<'s, S>, StoreError> {
        if session.in_transaction() {
            return Err(StoreError::TransactionAlreadyActive);
        }
        session.begin_transaction(mode).map_err(Into::into)?;
        Ok(TransactionScope {
            session,
            active: true,
        })
    }

    /// Run `f` inside a transaction, committing if it succeeds and rolling
    /// back if it fails.
    pub fn within<T, F>(session: &'s S, mode: CommitMode, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut TransactionScope<'s, S>) -> Result<T, StoreError>,
    {
        let mut scope = TransactionScope::begin(session, mode)?;
        let value = f(&mut scope)?;
        scope.commit()?;
        Ok(value)
    }

    pub fn session(&self) -> &'s S {
        self.session
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        let result = self.session.commit_transaction().map_err(Into::into);
        // A failed commit that left the transaction open is rolled back on drop.
        self.active = self.session.in_transaction();
        result
    }

    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.active = false;
        self.session.rollback_transaction().map_err(Into::into)
    }
}

impl<'s, S: BackendSession> Drop for TransactionScope<'s, S> {
    fn drop(&mut self) {
        if self.active {
            debug!("Rolling back abandoned transaction");
            if let Err(e) = self.session.rollback_transaction() {
                warn!("Failed to roll back transaction: {}", e);
            }
        }
    }
}

/// A prepared insert or replace of one record. Columns set through the scope
/// are written by `apply`; dropping the scope without applying cancels them.
#[derive(Debug)]
pub struct UpdateScope<'s, 't, S: BackendSession> {
    session: &'s S,
    table: &'t mut S::Table,
    pending: bool,
}

impl<'s, 't, S: BackendSession> UpdateScope<'s, 't, S> {
    pub fn prepare(session: &'s S, table: &'t mut S::Table, kind: UpdateKind) -> Result<UpdateScope<'s, 't, S>, StoreError> {
        session.prepare_update(table, kind).map_err(Into::into)?;
        Ok(UpdateScope {
            session,
            table,
            pending: true,
        })
    }

    pub fn set_column(&mut self, column: ColumnId, value: Option<&str>) -> Result<(), StoreError> {
        self.session.set_column(self.table, column, value).map_err(Into::into)
    }

    pub fn apply(mut self) -> Result<(), StoreError> {
        self.session.apply_update(self.table).map_err(Into::into)?;
        self.pending = false;
        Ok(())
    }
}

impl<'s, 't, S: BackendSession> Drop for UpdateScope<'s, 't, S> {
    fn drop(&mut self) {
        if self.pending {
            // The update may already be gone if applying it failed.
            if let Err(e) = self.session.cancel_update(self.table) {
                debug!("No update to cancel: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::Builder;

    use super::*;
    use crate::backend::{
        BackendInstance,
        BackendInstanceBuilder,
        ColumnFlags,
        CreateDatabaseFlags,
        IndexFlags,
        Move,
        SeekMode,
        Sqlite,
        SqliteInstance,
        SqliteSession,
        SqliteTable,
    };

    fn setup(root: &Path) -> (SqliteInstance, SqliteSession, SqliteTable, ColumnId) {
        let mut instance = Sqlite::new().create("scope", root).expect("instance");
        instance.init().expect("init");
        let mut session = instance.begin_session().expect("session");
        session.create_database(&root.join("scope.db"), CreateDatabaseFlags::OVERWRITE_EXISTING).expect("created");
        let mut table = session.create_table("data").expect("table");
        let key = session.add_column(&mut table, "key", ColumnFlags::empty()).expect("column");
        session.create_index(&mut table, "data_key", "key", IndexFlags::UNIQUE | IndexFlags::PRIMARY).expect("index");
        (instance, session, table, key)
    }

    fn insert(session: &SqliteSession, table: &mut SqliteTable, key: ColumnId, value: &str) -> Result<(), StoreError> {
        let mut update = UpdateScope::prepare(session, table, UpdateKind::Insert)?;
        update.set_column(key, Some(value))?;
        update.apply()
    }

    #[test]
    fn test_commit_and_rollback() {
        let root = Builder::new().prefix("test_commit_and_rollback").tempdir().expect("tempdir");
        let (_instance, session, mut table, key) = setup(root.path());

        TransactionScope::within(&session, CommitMode::Full, |_| insert(&session, &mut table, key, "kept")).expect("committed");
        assert!(!session.in_transaction());

        let failed: Result<(), StoreError> = TransactionScope::within(&session, CommitMode::Lazy, |_| {
            insert(&session, &mut table, key, "discarded")?;
            Err(StoreError::DatabaseEmpty)
        });
        assert!(failed.is_err());
        assert!(!session.in_transaction());

        assert!(session.seek(&mut table, "kept", SeekMode::Equal).expect("seek"));
        assert!(!session.seek(&mut table, "discarded", SeekMode::Equal).expect("seek"));
    }

    #[test]
    fn test_no_double_begin() {
        let root = Builder::new().prefix("test_no_double_begin").tempdir().expect("tempdir");
        let (_instance, session, _table, _key) = setup(root.path());

        let scope = TransactionScope::begin(&session, CommitMode::Lazy).expect("begun");
        match TransactionScope::begin(&session, CommitMode::Lazy) {
            Err(StoreError::TransactionAlreadyActive) => {},
            other => panic!("expected TransactionAlreadyActive, got {:?}", other.map(|_| ())),
        }
        drop(scope);
        assert!(!session.in_transaction());
        TransactionScope::begin(&session, CommitMode::Full).expect("begun").rollback().expect("rolled back");
    }

    #[test]
    fn test_dropped_update_is_cancelled() {
        let root = Builder::new().prefix("test_dropped_update_is_cancelled").tempdir().expect("tempdir");
        let (_instance, session, mut table, key) = setup(root.path());

        TransactionScope::within(&session, CommitMode::Lazy, |_| {
            let mut update = UpdateScope::prepare(&session, &mut table, UpdateKind::Insert)?;
            update.set_column(key, Some("never"))?;
            Ok(())
        })
        .expect("committed");

        // Nothing left prepared, so a new update can start.
        insert(&session, &mut table, key, "after").expect("inserted");
        assert!(session.move_to(&mut table, Move::First).expect("first"));
        assert_eq!(session.retrieve_column(&table, key).expect("key"), Some("after".to_owned()));
        assert!(!session.move_to(&mut table, Move::Next).expect("next"));
    }
}

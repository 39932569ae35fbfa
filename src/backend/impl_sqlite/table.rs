// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::collections::BTreeMap;

use log::debug;
use rusqlite::{
    params,
    params_from_iter,
    Connection,
    OptionalExtension,
};

use super::{
    quote,
    ErrorImpl,
};
use crate::backend::common::{
    ColumnFlags,
    ColumnId,
    IndexFlags,
    Move,
    SeekMode,
    UpdateKind,
};

/// Column backing SQLite's rowid. Tables need at least one column before any
/// other can be added.
const RECORD_ID_COLUMN: &str = "record_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Position {
    BeforeFirst,
    On(String),
    AfterLast,
}

#[derive(Debug)]
struct PendingUpdate {
    kind: UpdateKind,
    target: Option<String>,
    values: BTreeMap<ColumnId, Option<String>>,
}

/// An open table: its resolved columns, the column its primary index is built
/// on, and a position within that index that persists across transactions.
#[derive(Debug)]
pub struct TableImpl {
    name: String,
    columns: Vec<(ColumnId, String)>,
    key_column: Option<String>,
    position: Position,
    pending: Option<PendingUpdate>,
}

impl TableImpl {
    pub(crate) fn create(connection: &Connection, name: &str) -> Result<TableImpl, ErrorImpl> {
        connection.execute_batch(&format!(
            "CREATE TABLE {} ({} INTEGER PRIMARY KEY)",
            quote(name),
            quote(RECORD_ID_COLUMN)
        ))?;
        debug!("Created table {}", name);
        TableImpl::open(connection, name)
    }

    pub(crate) fn open(connection: &Connection, name: &str) -> Result<TableImpl, ErrorImpl> {
        let exists: i64 = connection.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(ErrorImpl::SchemaMismatch(format!("table {:?} does not exist", name)));
        }

        let mut table = TableImpl {
            name: name.to_owned(),
            columns: Vec::new(),
            key_column: None,
            position: Position::BeforeFirst,
            pending: None,
        };
        table.load_columns(connection)?;
        table.key_column = table.load_key_column(connection)?;
        Ok(table)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn has_pending_update(&self) -> bool {
        self.pending.is_some()
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> &Position {
        &self.position
    }

    fn load_columns(&mut self, connection: &Connection) -> Result<(), ErrorImpl> {
        let mut stmt = connection.prepare(&format!("PRAGMA table_info({})", quote(&self.name)))?;
        let rows = stmt.query_map(params![], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut columns = Vec::new();
        for row in rows {
            let (cid, name) = row?;
            columns.push((ColumnId::new(cid as u32), name));
        }
        self.columns = columns;
        Ok(())
    }

    /// The column of the first unique index created on this table.
    fn load_key_column(&self, connection: &Connection) -> Result<Option<String>, ErrorImpl> {
        let mut stmt = connection.prepare(&format!("PRAGMA index_list({})", quote(&self.name)))?;
        let rows = stmt.query_map(params![], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, bool>(2)?, row.get::<_, String>(3)?))
        })?;
        let mut index = None;
        for row in rows {
            let (name, unique, origin) = row?;
            if unique && origin == "c" {
                index = Some(name);
                break;
            }
        }

        let index = match index {
            Some(index) => index,
            None => return Ok(None),
        };
        let column = connection
            .query_row(&format!("PRAGMA index_info({})", quote(&index)), params![], |row| row.get::<_, String>(2))
            .optional()?;
        Ok(column)
    }

    fn key_column(&self) -> Result<&str, ErrorImpl> {
        self.key_column
            .as_deref()
            .ok_or_else(|| ErrorImpl::SchemaMismatch(format!("table {:?} has no primary index", self.name)))
    }

    fn column_name(&self, column: ColumnId) -> Result<&str, ErrorImpl> {
        self.columns
            .iter()
            .find(|(id, _)| *id == column)
            .map(|(_, name)| name.as_str())
            .ok_or_else(|| ErrorImpl::SchemaMismatch(format!("table {:?} has no column {}", self.name, column.get())))
    }

    pub(crate) fn column_id(&self, name: &str) -> Result<ColumnId, ErrorImpl> {
        self.columns
            .iter()
            .find(|(_, column)| column == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| ErrorImpl::SchemaMismatch(format!("table {:?} has no column {:?}", self.name, name)))
    }

    pub(crate) fn add_column(
        &mut self,
        connection: &Connection,
        name: &str,
        flags: ColumnFlags,
    ) -> Result<ColumnId, ErrorImpl> {
        if flags.contains(ColumnFlags::COMPRESSED) {
            debug!("Ignoring compression for column {} of table {}", name, self.name);
        }
        connection.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} TEXT", quote(&self.name), quote(name)))?;
        self.load_columns(connection)?;
        self.column_id(name)
    }

    pub(crate) fn create_index(
        &mut self,
        connection: &Connection,
        name: &str,
        column: &str,
        flags: IndexFlags,
    ) -> Result<(), ErrorImpl> {
        self.column_id(column)?;
        let unique = if flags.contains(IndexFlags::UNIQUE) {
            "UNIQUE "
        } else {
            ""
        };
        connection.execute_batch(&format!(
            "CREATE {}INDEX {} ON {} ({} ASC)",
            unique,
            quote(name),
            quote(&self.name),
            quote(column)
        ))?;
        if flags.contains(IndexFlags::PRIMARY) || self.key_column.is_none() {
            self.key_column = Some(column.to_owned());
        }
        Ok(())
    }

    /// First key in index order satisfying `predicate` against `bound`, or the
    /// first key overall when there is no predicate.
    fn find_key(
        &self,
        connection: &Connection,
        predicate: Option<(&str, &str)>,
        descending: bool,
    ) -> Result<Option<String>, ErrorImpl> {
        let key = quote(self.key_column()?);
        let order = if descending {
            "DESC"
        } else {
            "ASC"
        };
        let found = match predicate {
            Some((op, bound)) => {
                let sql = format!(
                    "SELECT {key} FROM {table} WHERE {key} {op} ?1 ORDER BY {key} {order} LIMIT 1",
                    key = key,
                    table = quote(&self.name),
                    op = op,
                    order = order
                );
                let mut stmt = connection.prepare_cached(&sql)?;
                stmt.query_row(params![bound], |row| row.get(0)).optional()?
            },
            None => {
                let sql = format!(
                    "SELECT {key} FROM {table} ORDER BY {key} {order} LIMIT 1",
                    key = key,
                    table = quote(&self.name),
                    order = order
                );
                let mut stmt = connection.prepare_cached(&sql)?;
                stmt.query_row(params![], |row| row.get(0)).optional()?
            },
        };
        Ok(found)
    }

    pub(crate) fn seek(&mut self, connection: &Connection, key: &str, mode: SeekMode) -> Result<bool, ErrorImpl> {
        let op = match mode {
            SeekMode::Equal => "=",
            SeekMode::GreaterOrEqual => ">=",
        };
        match self.find_key(connection, Some((op, key)), false)? {
            Some(found) => {
                self.position = Position::On(found);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    pub(crate) fn move_to(&mut self, connection: &Connection, to: Move) -> Result<bool, ErrorImpl> {
        let (found, miss) = match to {
            Move::BeforeFirst => {
                self.position = Position::BeforeFirst;
                return Ok(true);
            },
            Move::First => (self.find_key(connection, None, false)?, Position::BeforeFirst),
            Move::Last => (self.find_key(connection, None, true)?, Position::AfterLast),
            Move::Next => {
                let found = match &self.position {
                    Position::BeforeFirst => self.find_key(connection, None, false)?,
                    Position::On(current) => self.find_key(connection, Some((">", current)), false)?,
                    Position::AfterLast => None,
                };
                (found, Position::AfterLast)
            },
            Move::Previous => {
                let found = match &self.position {
                    Position::AfterLast => self.find_key(connection, None, true)?,
                    Position::On(current) => self.find_key(connection, Some(("<", current)), true)?,
                    Position::BeforeFirst => None,
                };
                (found, Position::BeforeFirst)
            },
        };
        match found {
            Some(key) => {
                self.position = Position::On(key);
                Ok(true)
            },
            None => {
                self.position = miss;
                Ok(false)
            },
        }
    }

    fn current_key(&self) -> Result<&str, ErrorImpl> {
        match &self.position {
            Position::On(key) => Ok(key),
            _ => Err(ErrorImpl::NoCurrentRecord),
        }
    }

    pub(crate) fn retrieve_column(&self, connection: &Connection, column: ColumnId) -> Result<Option<String>, ErrorImpl> {
        let current = self.current_key()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            quote(self.column_name(column)?),
            quote(&self.name),
            quote(self.key_column()?)
        );
        let mut stmt = connection.prepare_cached(&sql)?;
        let value: Option<Option<String>> = stmt.query_row(params![current], |row| row.get(0)).optional()?;
        value.ok_or(ErrorImpl::NoCurrentRecord)
    }

    pub(crate) fn prepare_update(&mut self, kind: UpdateKind) -> Result<(), ErrorImpl> {
        if self.pending.is_some() {
            return Err(ErrorImpl::UpdateAlreadyPrepared);
        }
        let target = match kind {
            UpdateKind::Insert => None,
            UpdateKind::Replace => Some(self.current_key()?.to_owned()),
        };
        self.pending = Some(PendingUpdate {
            kind,
            target,
            values: BTreeMap::new(),
        });
        Ok(())
    }

    pub(crate) fn set_column(&mut self, column: ColumnId, value: Option<&str>) -> Result<(), ErrorImpl> {
        self.column_name(column)?;
        let pending = self.pending.as_mut().ok_or(ErrorImpl::NoPreparedUpdate)?;
        pending.values.insert(column, value.map(str::to_owned));
        Ok(())
    }

    pub(crate) fn apply_update(&mut self, connection: &Connection) -> Result<(), ErrorImpl> {
        let pending = self.pending.take().ok_or(ErrorImpl::NoPreparedUpdate)?;
        if pending.values.is_empty() {
            return Ok(());
        }

        let mut names = Vec::with_capacity(pending.values.len());
        let mut values = Vec::with_capacity(pending.values.len() + 1);
        for (column, value) in &pending.values {
            names.push(quote(self.column_name(*column)?));
            values.push(value.clone());
        }

        match (pending.kind, pending.target) {
            (UpdateKind::Insert, _) => {
                let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(&self.name),
                    names.join(", "),
                    placeholders.join(", ")
                );
                connection.prepare_cached(&sql)?.execute(params_from_iter(values.iter()))?;
            },
            (UpdateKind::Replace, Some(target)) => {
                let key_column = quote(self.key_column()?);
                let assignments: Vec<String> =
                    names.iter().enumerate().map(|(i, name)| format!("{} = ?{}", name, i + 1)).collect();
                let sql = format!(
                    "UPDATE {} SET {} WHERE {} = ?{}",
                    quote(&self.name),
                    assignments.join(", "),
                    key_column,
                    names.len() + 1
                );
                values.push(Some(target));
                let changed = connection.prepare_cached(&sql)?.execute(params_from_iter(values.iter()))?;
                if changed == 0 {
                    return Err(ErrorImpl::NoCurrentRecord);
                }

                // Follow the record if its key was rewritten.
                let key_id = self.column_id(self.key_column()?)?;
                if let Some(Some(new_key)) = pending.values.get(&key_id) {
                    self.position = Position::On(new_key.clone());
                }
            },
            (UpdateKind::Replace, None) => return Err(ErrorImpl::NoCurrentRecord),
        }
        Ok(())
    }

    pub(crate) fn cancel_update(&mut self) -> Result<(), ErrorImpl> {
        self.pending.take().map(|_| ()).ok_or(ErrorImpl::NoPreparedUpdate)
    }

    /// Delete the record under the cursor. The position stays on the deleted
    /// key, so moving next or previous continues from where it was.
    pub(crate) fn delete_current(&mut self, connection: &Connection) -> Result<(), ErrorImpl> {
        let current = self.current_key()?;
        let sql = format!("DELETE FROM {} WHERE {} = ?1", quote(&self.name), quote(self.key_column()?));
        let deleted = connection.prepare_cached(&sql)?.execute(params![current])?;
        if deleted == 0 {
            return Err(ErrorImpl::NoCurrentRecord);
        }
        Ok(())
    }

    pub(crate) fn record_count(&self, connection: &Connection) -> Result<u64, ErrorImpl> {
        let count: i64 = connection.query_row(&format!("SELECT COUNT(*) FROM {}", quote(&self.name)), params![], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}

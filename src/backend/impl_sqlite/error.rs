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
    fmt,
    io,
};

use crate::{
    backend::traits::BackendError,
    error::StoreError,
};

#[derive(Debug)]
pub enum ErrorImpl {
    SqliteError(rusqlite::Error),
    IoError(io::Error),
    NotAttached,
    NoCurrentRecord,
    TransactionAlreadyActive,
    NoActiveTransaction,
    UpdateAlreadyPrepared,
    NoPreparedUpdate,
    SchemaMismatch(String),
    InvalidConfiguration(String),
    NotInitialized(String),
}

impl BackendError for ErrorImpl {}

impl fmt::Display for ErrorImpl {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorImpl::SqliteError(e) => e.fmt(fmt),
            ErrorImpl::IoError(e) => e.fmt(fmt),
            ErrorImpl::NotAttached => write!(fmt, "NotAttached"),
            ErrorImpl::NoCurrentRecord => write!(fmt, "NoCurrentRecord"),
            ErrorImpl::TransactionAlreadyActive => write!(fmt, "TransactionAlreadyActive"),
            ErrorImpl::NoActiveTransaction => write!(fmt, "NoActiveTransaction"),
            ErrorImpl::UpdateAlreadyPrepared => write!(fmt, "UpdateAlreadyPrepared"),
            ErrorImpl::NoPreparedUpdate => write!(fmt, "NoPreparedUpdate"),
            ErrorImpl::SchemaMismatch(what) => write!(fmt, "SchemaMismatch ({})", what),
            ErrorImpl::InvalidConfiguration(what) => write!(fmt, "InvalidConfiguration ({})", what),
            ErrorImpl::NotInitialized(name) => write!(fmt, "NotInitialized ({})", name),
        }
    }
}

#[allow(clippy::from_over_into)]
impl Into<StoreError> for ErrorImpl {
    fn into(self) -> StoreError {
        match self {
            ErrorImpl::SqliteError(error) => StoreError::SqliteError(error),
            ErrorImpl::IoError(error) => StoreError::IoError(error),
            ErrorImpl::NotAttached => StoreError::DatabaseNotAttached,
            ErrorImpl::NoCurrentRecord => StoreError::NoCurrentRecord,
            ErrorImpl::TransactionAlreadyActive => StoreError::TransactionAlreadyActive,
            ErrorImpl::NoActiveTransaction => StoreError::NoActiveTransaction,
            ErrorImpl::UpdateAlreadyPrepared => StoreError::UpdateAlreadyPrepared,
            ErrorImpl::NoPreparedUpdate => StoreError::NoPreparedUpdate,
            ErrorImpl::SchemaMismatch(what) => StoreError::SchemaMismatch(what),
            ErrorImpl::InvalidConfiguration(what) => StoreError::InvalidConfiguration(what),
            ErrorImpl::NotInitialized(name) => StoreError::InstanceNotInitialized(name),
        }
    }
}

impl From<io::Error> for ErrorImpl {
    fn from(e: io::Error) -> ErrorImpl {
        ErrorImpl::IoError(e)
    }
}

impl From<rusqlite::Error> for ErrorImpl {
    fn from(e: rusqlite::Error) -> ErrorImpl {
        ErrorImpl::SqliteError(e)
    }
}

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
    path::{
        Path,
        PathBuf,
    },
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Mutex,
        MutexGuard,
    },
};

use crate::error::StoreError;

pub(crate) const TABLE_NAME: &str = "shelf_data";
pub(crate) const KEY_COLUMN: &str = "key";
pub(crate) const VALUE_COLUMN: &str = "value";
pub(crate) const KEY_INDEX: &str = "shelf_data_key";

/// The part of an open database that every cursor on it shares: the lock that
/// serializes writers and the cached record count.
#[derive(Debug)]
pub(crate) struct SharedDatabase {
    path: PathBuf,
    write_lock: Mutex<()>,
    pub(crate) record_count: RecordCount,
}

impl SharedDatabase {
    pub(crate) fn new(path: PathBuf) -> SharedDatabase {
        SharedDatabase {
            path,
            write_lock: Mutex::new(()),
            record_count: RecordCount::unknown(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Held for the whole of every mutating transaction. Not reentrant.
    pub(crate) fn lock_writes(&self) -> Result<MutexGuard<()>, StoreError> {
        Ok(self.write_lock.lock()?)
    }
}

const UNKNOWN: u64 = u64::MAX;

/// Number of records in the table, or unknown until first computed.
///
/// Writers only change it while holding the write lock, after their
/// transaction has committed.
#[derive(Debug)]
pub(crate) struct RecordCount(AtomicU64);

impl RecordCount {
    pub(crate) fn unknown() -> RecordCount {
        RecordCount(AtomicU64::new(UNKNOWN))
    }

    pub(crate) fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::SeqCst) {
            UNKNOWN => None,
            n => Some(n),
        }
    }

    pub(crate) fn set(&self, n: u64) {
        self.0.store(n, Ordering::SeqCst);
    }

    /// Apply a committed change. Does nothing while the count is unknown.
    pub(crate) fn adjust(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(n) = self.get() {
            let adjusted = if delta < 0 {
                n.saturating_sub(delta.unsigned_abs())
            } else {
                n.saturating_add(delta as u64)
            };
            self.set(adjusted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_count() {
        let count = RecordCount::unknown();
        assert_eq!(count.get(), None);
        count.adjust(1);
        assert_eq!(count.get(), None);

        count.set(0);
        count.adjust(3);
        count.adjust(-1);
        assert_eq!(count.get(), Some(2));
        count.adjust(-5);
        assert_eq!(count.get(), Some(0));
    }

    #[test]
    fn test_write_lock_is_exclusive() {
        let database = SharedDatabase::new(PathBuf::from("/tmp/shared.db"));
        let guard = database.lock_writes().expect("locked");
        assert!(database.write_lock.try_lock().is_err());
        drop(guard);
        assert!(database.write_lock.try_lock().is_ok());
        assert_eq!(database.path(), Path::new("/tmp/shared.db"));
    }
}

// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use log::trace;

use crate::{
    backend::BackendInstanceBuilder,
    cursor::{
        Cursor,
        Record,
    },
    error::StoreError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Start,
    After(String),
    Done,
}

/// Records of a cursor in ascending key order.
///
/// Each call to `next` runs its own transaction and remembers the last key
/// it returned, so the iterator doesn't depend on the cursor's position and
/// resumes correctly after the cursor has been used in between. An error ends
/// the iteration.
#[derive(Debug)]
pub struct Iter<'c, B: BackendInstanceBuilder> {
    cursor: &'c Cursor<B>,
    position: Position,
    with_value: bool,
}

impl<'c, B: BackendInstanceBuilder> Iter<'c, B> {
    pub(crate) fn new(cursor: &'c Cursor<B>, with_value: bool) -> Iter<'c, B> {
        Iter {
            cursor,
            position: Position::Start,
            with_value,
        }
    }
}

impl<'c, B: BackendInstanceBuilder> Iterator for Iter<'c, B> {
    type Item = Result<Record, StoreError>;

    fn next(&mut self) -> Option<Result<Record, StoreError>> {
        let result = match &self.position {
            Position::Start => self.cursor.record_after(None, self.with_value),
            Position::After(key) => self.cursor.record_after(Some(key.as_str()), self.with_value),
            Position::Done => return None,
        };
        match result {
            Ok(Some(record)) => {
                trace!("Iterated to {:?}", record.0);
                self.position = Position::After(record.0.clone());
                Some(Ok(record))
            },
            Ok(None) => {
                self.position = Position::Done;
                None
            },
            Err(e) => {
                self.position = Position::Done;
                Some(Err(e))
            },
        }
    }
}

#[derive(Debug)]
pub struct Keys<'c, B: BackendInstanceBuilder> {
    inner: Iter<'c, B>,
}

impl<'c, B: BackendInstanceBuilder> Keys<'c, B> {
    pub(crate) fn new(inner: Iter<'c, B>) -> Keys<'c, B> {
        Keys {
            inner,
        }
    }
}

impl<'c, B: BackendInstanceBuilder> Iterator for Keys<'c, B> {
    type Item = Result<String, StoreError>;

    fn next(&mut self) -> Option<Result<String, StoreError>> {
        self.inner.next().map(|result| result.map(|(key, _)| key))
    }
}

#[derive(Debug)]
pub struct Values<'c, B: BackendInstanceBuilder> {
    inner: Iter<'c, B>,
}

impl<'c, B: BackendInstanceBuilder> Values<'c, B> {
    pub(crate) fn new(inner: Iter<'c, B>) -> Values<'c, B> {
        Values {
            inner,
        }
    }
}

impl<'c, B: BackendInstanceBuilder> Iterator for Values<'c, B> {
    type Item = Result<Option<String>, StoreError>;

    fn next(&mut self) -> Option<Result<Option<String>, StoreError>> {
        self.inner.next().map(|result| result.map(|(_, value)| value))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::Builder;

    use crate::{
        mode::OpenMode,
        registry::Registry,
    };

    #[test]
    fn test_keys_skip_values() {
        let root = Builder::new().prefix("test_keys_skip_values").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let cursor = registry.open(root.path().join("test.db"), OpenMode::New, false).expect("opened");
        cursor.set("b", "2").expect("set");
        cursor.set("a", "1").expect("set");

        let mut iter = cursor.iter().expect("iter");
        assert_eq!(iter.next().expect("item").expect("record"), ("a".to_owned(), Some("1".to_owned())));

        let keys: Vec<String> = cursor.iter_keys().expect("keys").map(|key| key.expect("key")).collect();
        assert_eq!(keys, vec!["a", "b"]);

        // The second iterator didn't disturb the first.
        assert_eq!(iter.next().expect("item").expect("record").0, "b");
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_error_ends_iteration() {
        let root = Builder::new().prefix("test_error_ends_iteration").tempdir().expect("tempdir");
        let registry = Arc::new(Registry::new());
        let cursor = registry.open(root.path().join("test.db"), OpenMode::New, false).expect("opened");
        cursor.set("a", "1").expect("set");
        cursor.set("b", "2").expect("set");

        let mut values = cursor.iter_values().expect("values");
        assert_eq!(values.next().expect("item").expect("value"), Some("1".to_owned()));
        cursor.close().expect("closed");
        assert!(values.next().expect("item").is_err());
        assert!(values.next().is_none());
    }
}

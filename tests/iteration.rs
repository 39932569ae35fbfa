// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::sync::Arc;

use shelfdb::{
    Cursor,
    OpenMode,
    Registry,
    StoreError,
};
use tempfile::{
    Builder,
    TempDir,
};

fn populated(prefix: &str, keys: &[&str]) -> (TempDir, Cursor) {
    let root = Builder::new().prefix(prefix).tempdir().expect("tempdir");
    let registry = Arc::new(Registry::new());
    let cursor = registry.open(root.path().join("test.db"), OpenMode::New, false).expect("opened");
    for key in keys {
        cursor.set(*key, key.to_uppercase()).expect("set");
    }
    (root, cursor)
}

#[test]
fn test_iterate_in_order() {
    let (_root, cursor) = populated("test_iterate_in_order", &["m", "z", "a"]);
    let items: Vec<_> = cursor.iter().expect("iter").map(|item| item.expect("item")).collect();
    assert_eq!(
        items,
        vec![
            ("a".to_owned(), Some("A".to_owned())),
            ("m".to_owned(), Some("M".to_owned())),
            ("z".to_owned(), Some("Z".to_owned())),
        ]
    );

    // Each iterator starts over from the first record.
    assert_eq!(cursor.iter_keys().expect("keys").count(), 3);
    assert_eq!(cursor.iter_keys().expect("keys").count(), 3);
}

#[test]
fn test_delete_while_iterating() {
    let (_root, cursor) = populated("test_delete_while_iterating", &["a", "b", "c", "d"]);
    let mut seen = Vec::new();
    for key in cursor.iter_keys().expect("keys") {
        let key = key.expect("key");
        cursor.delete(&key).expect("deleted");
        seen.push(key);
    }
    assert_eq!(seen, vec!["a", "b", "c", "d"]);
    assert!(cursor.is_empty().expect("is_empty"));
}

#[test]
fn test_write_ahead_while_iterating() {
    let (_root, cursor) = populated("test_write_ahead_while_iterating", &["a", "c"]);
    let mut seen = Vec::new();
    for item in cursor.iter().expect("iter") {
        let (key, _) = item.expect("item");
        if key == "a" {
            cursor.set("b", "inserted").expect("set");
            cursor.delete("c").expect("deleted");
        }
        seen.push(key);
    }
    assert_eq!(seen, vec!["a", "b"]);
}

#[test]
fn test_reads_between_items() {
    let (_root, cursor) = populated("test_reads_between_items", &["a", "b", "c"]);
    for item in cursor.iter().expect("iter") {
        let (key, value) = item.expect("item");
        assert_eq!(cursor.get(&key).expect("read"), value);
        // Moving the cursor doesn't disturb the iteration.
        cursor.last().expect("last");
        assert!(cursor.len().expect("len") == 3);
    }
}

#[test]
fn test_close_while_iterating() {
    let (_root, cursor) = populated("test_close_while_iterating", &["a", "b", "c"]);
    let mut iter = cursor.iter().expect("iter");
    assert_eq!(iter.next().expect("first").expect("item").0, "a");
    cursor.close().expect("closed");
    match iter.next() {
        Some(Err(StoreError::CursorClosed)) => {},
        other => panic!("expected CursorClosed, got {:?}", other),
    }
    assert!(iter.next().is_none());
}

#[test]
fn test_values_include_null() {
    let (_root, cursor) = populated("test_values_include_null", &["a"]);
    cursor.set("b", None::<&str>).expect("set");
    let values: Result<Vec<_>, _> = cursor.iter_values().expect("values").collect();
    assert_eq!(values.expect("values"), vec![Some("A".to_owned()), None]);
}

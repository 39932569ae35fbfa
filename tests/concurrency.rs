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
    sync::Arc,
    thread,
};

use shelfdb::{
    OpenMode,
    Registry,
};
use tempfile::Builder;

const THREADS: u32 = 8;
const WRITES: u32 = 50;

#[test]
fn test_visible_after_commit() {
    let root = Builder::new().prefix("test_visible_after_commit").tempdir().expect("tempdir");
    let registry = Arc::new(Registry::new());
    let path = root.path().join("test.db");

    let a = registry.open(&path, OpenMode::New, false).expect("opened");
    let b = registry.open(&path, OpenMode::ReadWrite, false).expect("opened");
    assert!(!b.contains("hello").expect("contains"));

    a.set("hello", "world").expect("set");
    assert_eq!(b.get("hello").expect("read"), Some("world".to_owned()));
    assert_eq!(b.len().expect("len"), 1);
}

#[test]
fn test_concurrent_writers() {
    let root = Builder::new().prefix("test_concurrent_writers").tempdir().expect("tempdir");
    let registry = Arc::new(Registry::new());
    let path = root.path().join("test.db");
    let owner = registry.open(&path, OpenMode::New, true).expect("opened");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = registry.clone();
            let path = path.clone();
            thread::spawn(move || {
                let cursor = registry.open(&path, OpenMode::ReadWrite, true).expect("opened");
                for i in 0..WRITES {
                    cursor.set(format!("{:02}-{:03}", t, i), i).expect("set");
                }
                // Shared keys collide across threads without conflicting.
                for i in 0..WRITES {
                    cursor.set(format!("shared-{:03}", i), t).expect("set shared");
                }
                cursor.delete(format!("{:02}-{:03}", t, 0)).expect("deleted");
                cursor.len().expect("len")
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("joined");
    }

    let expected = u64::from(THREADS * (WRITES - 1) + WRITES);
    assert_eq!(owner.len().expect("len"), expected);
    assert_eq!(owner.keys().expect("keys").len() as u64, expected);
    assert_eq!(registry.open_cursors(&path).expect("count"), 1);
}

#[test]
fn test_concurrent_open_and_close() {
    let root = Builder::new().prefix("test_concurrent_open_and_close").tempdir().expect("tempdir");
    let registry = Arc::new(Registry::new());
    let path = root.path().join("test.db");
    registry.open(&path, OpenMode::New, false).expect("created").close().expect("closed");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = registry.clone();
            let path = path.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let cursor = registry.open(&path, OpenMode::Create, false).expect("opened");
                    cursor.set(format!("{}-{}", t, i), "x").expect("set");
                    cursor.close().expect("closed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("joined");
    }

    assert!(registry.open_databases().expect("databases").is_empty());
    let cursor = registry.open(&path, OpenMode::ReadOnly, false).expect("opened");
    assert_eq!(cursor.len().expect("len"), u64::from(THREADS * 10));
}

#[test]
fn test_separate_databases_in_parallel() {
    let root = Builder::new().prefix("test_separate_databases_in_parallel").tempdir().expect("tempdir");
    let registry = Arc::new(Registry::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = registry.clone();
            let path = root.path().join(format!("db-{}.db", t));
            thread::spawn(move || {
                let cursor = registry.open(&path, OpenMode::New, true).expect("opened");
                for i in 0..WRITES {
                    cursor.set(i, t).expect("set");
                }
                cursor.len().expect("len")
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("joined"), u64::from(WRITES));
    }
    assert!(registry.open_databases().expect("databases").is_empty());
}

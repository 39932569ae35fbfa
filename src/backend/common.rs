// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttachFlags: u32 {
        const READ_ONLY = 0x0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateDatabaseFlags: u32 {
        const OVERWRITE_EXISTING = 0x0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColumnFlags: u32 {
        const COMPRESSED = 0x0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IndexFlags: u32 {
        const UNIQUE = 0x0001;
        const PRIMARY = 0x0002;
    }
}

/// How the log records of a transaction reach the disk when it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitMode {
    /// The commit is durable once the call returns.
    Full,
    /// The commit is acknowledged before its log records are flushed. The
    /// database stays consistent after a crash, but recent commits may be lost.
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekMode {
    Equal,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Move {
    BeforeFirst,
    First,
    Last,
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Insert,
    Replace,
}

/// An engine-assigned column identifier, only meaningful for the table it was
/// resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId(u32);

impl ColumnId {
    pub fn new(id: u32) -> ColumnId {
        ColumnId(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

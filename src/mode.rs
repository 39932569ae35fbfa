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
    str::FromStr,
};

use crate::{
    backend::AttachFlags,
    error::StoreError,
};

/// How `open` treats the database file at the given path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Open an existing database for reading only (`"r"`).
    ReadOnly,
    /// Open an existing database for reading and writing (`"w"`).
    ReadWrite,
    /// Open for reading and writing, creating the database if missing (`"c"`).
    Create,
    /// Always create a new, empty database, discarding any existing one (`"n"`).
    New,
}

impl OpenMode {
    pub fn is_read_only(self) -> bool {
        self == OpenMode::ReadOnly
    }

    pub(crate) fn attach_flags(self) -> AttachFlags {
        if self.is_read_only() {
            AttachFlags::READ_ONLY
        } else {
            AttachFlags::empty()
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::ReadOnly => "r",
            OpenMode::ReadWrite => "w",
            OpenMode::Create => "c",
            OpenMode::New => "n",
        }
    }
}

impl Default for OpenMode {
    fn default() -> OpenMode {
        OpenMode::Create
    }
}

impl FromStr for OpenMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<OpenMode, StoreError> {
        match s {
            "r" => Ok(OpenMode::ReadOnly),
            "w" => Ok(OpenMode::ReadWrite),
            "c" => Ok(OpenMode::Create),
            "n" => Ok(OpenMode::New),
            _ => Err(StoreError::InvalidOpenMode(s.to_owned())),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        for mode in &[OpenMode::ReadOnly, OpenMode::ReadWrite, OpenMode::Create, OpenMode::New] {
            assert_eq!(mode.as_str().parse::<OpenMode>().expect("parsed"), *mode);
        }
        match "x".parse::<OpenMode>() {
            Err(StoreError::InvalidOpenMode(s)) => assert_eq!(s, "x"),
            other => panic!("expected InvalidOpenMode, got {:?}", other),
        }
        assert!("".parse::<OpenMode>().is_err());
        assert!("rw".parse::<OpenMode>().is_err());
    }

    #[test]
    fn test_attach_flags() {
        assert_eq!(OpenMode::ReadOnly.attach_flags(), AttachFlags::READ_ONLY);
        assert_eq!(OpenMode::New.attach_flags(), AttachFlags::empty());
        assert_eq!(OpenMode::default(), OpenMode::Create);
    }
}

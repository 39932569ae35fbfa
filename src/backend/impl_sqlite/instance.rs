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
    ffi::OsString,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    time::Duration,
};

use log::{
    debug,
    warn,
};

use super::{
    ErrorImpl,
    SessionImpl,
};
use crate::backend::traits::{
    BackendInstance,
    BackendInstanceBuilder,
};

const DEFAULT_PAGE_SIZE: u32 = 8192;
const DEFAULT_LOG_FILE_SIZE_KIB: u32 = 1024;
const DEFAULT_CACHE_SIZE_MIN: u32 = 64;
const DEFAULT_CACHE_SIZE_MAX: u32 = 1 << 30;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite's write-ahead log, its shared-memory index, and the rollback
/// journal used before the database is switched into WAL mode.
const LOG_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InstanceBuilderImpl {
    log_dir: Option<PathBuf>,
    log_file_size: u32,
    circular_log: bool,
    page_size: u32,
    cache_size_min: u32,
    cache_size_max: u32,
    busy_timeout: Duration,
}

impl InstanceBuilderImpl {
    /// How long a session waits on a lock held by another connection before
    /// reporting `SQLITE_BUSY`.
    pub fn set_busy_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for InstanceBuilderImpl {
    fn default() -> InstanceBuilderImpl {
        <InstanceBuilderImpl as BackendInstanceBuilder>::new()
    }
}

impl BackendInstanceBuilder for InstanceBuilderImpl {
    type Error = ErrorImpl;
    type Instance = InstanceImpl;

    fn new() -> InstanceBuilderImpl {
        InstanceBuilderImpl {
            log_dir: None,
            log_file_size: DEFAULT_LOG_FILE_SIZE_KIB,
            circular_log: true,
            page_size: DEFAULT_PAGE_SIZE,
            cache_size_min: DEFAULT_CACHE_SIZE_MIN,
            cache_size_max: DEFAULT_CACHE_SIZE_MAX,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    fn set_log_dir<P>(&mut self, dir: P) -> &mut Self
    where
        P: Into<PathBuf>,
    {
        self.log_dir = Some(dir.into());
        self
    }

    fn set_log_file_size(&mut self, kib: u32) -> &mut Self {
        self.log_file_size = kib;
        self
    }

    fn set_circular_log(&mut self, circular: bool) -> &mut Self {
        self.circular_log = circular;
        self
    }

    fn set_page_size(&mut self, bytes: u32) -> &mut Self {
        self.page_size = bytes;
        self
    }

    fn set_cache_size_min(&mut self, pages: u32) -> &mut Self {
        self.cache_size_min = pages;
        self
    }

    fn set_cache_size_max(&mut self, pages: u32) -> &mut Self {
        self.cache_size_max = pages;
        self
    }

    fn create(&self, name: &str, dir: &Path) -> Result<InstanceImpl, ErrorImpl> {
        if let Some(log_dir) = &self.log_dir {
            if log_dir != dir {
                // The WAL always lives beside the database file.
                warn!("Ignoring `set_log_dir({:?})` for instance {}", log_dir, name);
            }
        }
        if self.cache_size_min != DEFAULT_CACHE_SIZE_MIN {
            warn!("Ignoring `set_cache_size_min({})` for instance {}", self.cache_size_min, name);
        }

        let settings = Settings {
            page_size: self.page_size,
            cache_size: self.cache_size_max,
            journal_size_limit: i64::from(self.log_file_size) * 1024,
            auto_checkpoint: if self.circular_log {
                // One log file's worth of pages.
                (u64::from(self.log_file_size) * 1024 / u64::from(self.page_size.max(1))).max(1)
            } else {
                0
            },
            busy_timeout: self.busy_timeout,
        };

        debug!("Created instance {} in {:?}", name, dir);
        Ok(InstanceImpl {
            name: name.to_owned(),
            log_file_size: self.log_file_size,
            cache_size_min: self.cache_size_min,
            settings: Arc::new(settings),
            initialized: false,
            sessions: Arc::new(()),
        })
    }
}

/// Engine parameters frozen when the instance is created and shared by every
/// session it hands out.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) page_size: u32,
    pub(crate) cache_size: u32,
    pub(crate) journal_size_limit: i64,
    pub(crate) auto_checkpoint: u64,
    pub(crate) busy_timeout: Duration,
}

impl Settings {
    pub(crate) fn valid_page_size(&self) -> bool {
        self.page_size.is_power_of_two() && (512..=65536).contains(&self.page_size)
    }
}

#[derive(Debug)]
pub struct InstanceImpl {
    name: String,
    log_file_size: u32,
    cache_size_min: u32,
    settings: Arc<Settings>,
    initialized: bool,
    sessions: Arc<()>,
}

impl InstanceImpl {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of sessions begun on this instance that have not ended yet.
    pub fn open_sessions(&self) -> usize {
        Arc::strong_count(&self.sessions) - 1
    }
}

impl BackendInstance for InstanceImpl {
    type Error = ErrorImpl;
    type Session = SessionImpl;

    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> Result<(), ErrorImpl> {
        if self.initialized {
            return Ok(());
        }
        if self.log_file_size == 0 {
            return Err(ErrorImpl::InvalidConfiguration("log file size must not be zero".into()));
        }
        if self.settings.cache_size < self.cache_size_min {
            return Err(ErrorImpl::InvalidConfiguration(format!(
                "cache size maximum {} is below the minimum {}",
                self.settings.cache_size, self.cache_size_min
            )));
        }
        if self.settings.auto_checkpoint > i32::MAX as u64 {
            return Err(ErrorImpl::InvalidConfiguration(format!(
                "log file size {} KiB is too large for {} byte pages",
                self.log_file_size, self.settings.page_size
            )));
        }
        if self.settings.cache_size > i32::MAX as u32 {
            return Err(ErrorImpl::InvalidConfiguration(format!("cache size {} is too large", self.settings.cache_size)));
        }
        self.initialized = true;
        debug!("Initialized instance {}", self.name);
        Ok(())
    }

    fn begin_session(&self) -> Result<SessionImpl, ErrorImpl> {
        if !self.initialized {
            return Err(ErrorImpl::NotInitialized(self.name.clone()));
        }
        Ok(SessionImpl::new(self.settings.clone(), self.sessions.clone()))
    }

    fn database_files(&self, path: &Path) -> Vec<PathBuf> {
        let mut files = vec![path.to_path_buf()];
        files.extend(LOG_FILE_SUFFIXES.iter().map(|suffix| {
            let mut name = OsString::from(path.as_os_str());
            name.push(suffix);
            PathBuf::from(name)
        }));
        files
    }

    fn terminate(self) -> Result<(), ErrorImpl> {
        let open = self.open_sessions();
        if open > 0 {
            warn!("Terminating instance {} with {} sessions still open", self.name, open);
        }
        debug!("Terminated instance {}", self.name);
        Ok(())
    }
}

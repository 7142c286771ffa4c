//! Engine configuration.
//!
//! Every option is a named field validated once in [`ConfigBuilder::build`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::events::{EventSink, LogSink};
use crate::storage::page::{is_valid_page_size, DEFAULT_PAGE_SIZE};

/// Default number of base pages kept in the page cache.
pub const DEFAULT_CACHE_PAGES: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("page size {0} is not a power of two between 512 and 65536")]
    InvalidPageSize(usize),

    #[error("writer timeout must be non-zero; use WriterPolicy::FailFast instead")]
    ZeroWriterTimeout,
}

/// What `begin_write` does while another writer holds the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterPolicy {
    /// Wait until the slot is free.
    Block,
    /// Fail immediately with `WriteConflict`.
    FailFast,
    /// Wait up to the given duration, then fail with `WriteConflict`.
    Timeout(Duration),
}

/// Database-wide switches consumed by layers above the storage engine.
///
/// The engine stores them and hands them back; page and WAL behaviour never
/// depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbFlag {
    /// Accept double-quoted string literals in DDL statements.
    DqsDdl,
    /// Accept double-quoted string literals in DML statements.
    DqsDml,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Page size for newly created stores. Existing stores keep theirs.
    pub page_size: usize,
    /// Capacity of the base page cache. Zero disables caching.
    pub cache_pages: usize,
    pub writer_policy: WriterPolicy,
    /// Whether every commit fsyncs the WAL.
    pub sync_on_commit: bool,
    /// Checkpoint after a commit once the WAL holds this many frames.
    /// Zero disables automatic checkpoints.
    pub auto_checkpoint_frames: usize,
    /// Initial value of both [`DbFlag`] switches.
    pub double_quoted_strings: bool,
    pub event_sink: Arc<dyn EventSink>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Checks the options. The fields are public, so anything built
    /// without [`ConfigBuilder::build`] is checked again when a store is
    /// created or opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_page_size(self.page_size) {
            return Err(ConfigError::InvalidPageSize(self.page_size));
        }
        if self.writer_policy == WriterPolicy::Timeout(Duration::ZERO) {
            return Err(ConfigError::ZeroWriterTimeout);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            writer_policy: WriterPolicy::Block,
            sync_on_commit: true,
            auto_checkpoint_frames: 0,
            double_quoted_strings: false,
            event_sink: Arc::new(LogSink),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.config.cache_pages = cache_pages;
        self
    }

    pub fn writer_policy(mut self, policy: WriterPolicy) -> Self {
        self.config.writer_policy = policy;
        self
    }

    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.config.sync_on_commit = sync;
        self
    }

    pub fn auto_checkpoint_frames(mut self, frames: usize) -> Self {
        self.config.auto_checkpoint_frames = frames;
        self
    }

    pub fn double_quoted_strings(mut self, enabled: bool) -> Self {
        self.config.double_quoted_strings = enabled;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.config.event_sink = sink;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Current values of the [`DbFlag`] switches.
#[derive(Debug, Default)]
pub struct Flags {
    dqs_ddl: AtomicBool,
    dqs_dml: AtomicBool,
}

impl Flags {
    pub fn new(double_quoted_strings: bool) -> Self {
        Self {
            dqs_ddl: AtomicBool::new(double_quoted_strings),
            dqs_dml: AtomicBool::new(double_quoted_strings),
        }
    }

    fn slot(&self, flag: DbFlag) -> &AtomicBool {
        match flag {
            DbFlag::DqsDdl => &self.dqs_ddl,
            DbFlag::DqsDml => &self.dqs_dml,
        }
    }

    /// Sets `flag` and returns its previous value.
    pub fn set(&self, flag: DbFlag, enabled: bool) -> bool {
        self.slot(flag).swap(enabled, Ordering::SeqCst)
    }

    pub fn get(&self, flag: DbFlag) -> bool {
        self.slot(flag).load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.cache_pages, DEFAULT_CACHE_PAGES);
        assert_eq!(config.writer_policy, WriterPolicy::Block);
        assert!(config.sync_on_commit);
        assert_eq!(config.auto_checkpoint_frames, 0);
    }

    #[test]
    fn test_builder_options() {
        let config = Config::builder()
            .page_size(1024)
            .cache_pages(0)
            .writer_policy(WriterPolicy::FailFast)
            .sync_on_commit(false)
            .auto_checkpoint_frames(100)
            .double_quoted_strings(true)
            .build()
            .unwrap();

        assert_eq!(config.page_size, 1024);
        assert_eq!(config.cache_pages, 0);
        assert_eq!(config.writer_policy, WriterPolicy::FailFast);
        assert!(!config.sync_on_commit);
        assert_eq!(config.auto_checkpoint_frames, 100);
        assert!(config.double_quoted_strings);
    }

    #[test]
    fn test_invalid_page_size() {
        assert_eq!(
            Config::builder().page_size(1000).build().unwrap_err(),
            ConfigError::InvalidPageSize(1000)
        );
        assert!(Config::builder().page_size(256).build().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = Config::builder()
            .writer_policy(WriterPolicy::Timeout(Duration::ZERO))
            .build();
        assert_eq!(result.unwrap_err(), ConfigError::ZeroWriterTimeout);

        assert!(Config::builder()
            .writer_policy(WriterPolicy::Timeout(Duration::from_millis(10)))
            .build()
            .is_ok());
    }

    #[test]
    fn test_validate_struct_literal() {
        let config = Config {
            page_size: 16,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPageSize(16)));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_flags() {
        let flags = Flags::new(true);
        assert!(flags.get(DbFlag::DqsDdl));
        assert!(flags.get(DbFlag::DqsDml));

        assert!(flags.set(DbFlag::DqsDdl, false));
        assert!(!flags.get(DbFlag::DqsDdl));
        assert!(flags.get(DbFlag::DqsDml));
    }
}

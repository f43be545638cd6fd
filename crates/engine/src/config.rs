//! Engine configuration, loaded from TOML.

use std::path::Path;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use lessonsync_core::{partition::validate_academic_year, Partition};
use lessonsync_storage::RestConfig;

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Opaque id used to scope every remote call.
    pub tenant_id: String,

    /// Year used when a caller asks for "the current" partition.
    #[serde(default = "default_academic_year")]
    pub active_academic_year: String,

    /// SQLite file for the local cache; `:memory:` keeps it in process.
    #[serde(default = "default_cache_path")]
    pub local_cache_path: String,

    /// Auto-assignment skips half-terms holding this many lessons or more.
    #[serde(default = "default_half_term_capacity")]
    pub half_term_capacity: usize,

    /// Sync event channel capacity; slow subscribers lose the oldest events.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Remote mirror. Absent means offline-only.
    #[serde(default)]
    pub remote: Option<RestConfig>,
}

fn default_academic_year() -> String {
    academic_year_for(Utc::now().date_naive())
}
fn default_cache_path() -> String {
    "lessonsync.db".to_string()
}
fn default_half_term_capacity() -> usize {
    10
}
fn default_event_buffer() -> usize {
    64
}
fn default_log_filter() -> String {
    "lessonsync=info".to_string()
}

/// Academic years start in September.
pub fn academic_year_for(date: NaiveDate) -> String {
    let start = if date.month() >= 9 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}-{}", start, start + 1)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tenant_id: "local".to_string(),
            active_academic_year: default_academic_year(),
            local_cache_path: default_cache_path(),
            half_term_capacity: default_half_term_capacity(),
            event_buffer: default_event_buffer(),
            log_filter: default_log_filter(),
            remote: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tenant_id.trim().is_empty() {
            return Err(EngineError::Config("tenant_id is empty".into()));
        }
        validate_academic_year(&self.active_academic_year)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        if self.half_term_capacity == 0 {
            return Err(EngineError::Config("half_term_capacity must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(EngineError::Config("event_buffer must be positive".into()));
        }
        EnvFilter::try_new(&self.log_filter)
            .map_err(|e| EngineError::Config(format!("log_filter: {e}")))?;
        Ok(())
    }

    /// `collection` in the active academic year.
    pub fn active_partition(&self, collection: &str) -> Result<Partition, EngineError> {
        Ok(Partition::new(collection, self.active_academic_year.clone())?)
    }
}

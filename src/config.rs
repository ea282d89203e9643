//! Configuration Module
//!
//! Handles loading and validating engine configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::MAX_TIMER_DELAY_MS;
use crate::error::{CacheError, Result};

/// Default byte ceiling: 100 MiB
pub const DEFAULT_MAX_BYTE_SIZE: u64 = 100 * 1024 * 1024;

/// Default quiet period before a background save
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default cache file location
pub const DEFAULT_CACHE_FILE: &str = "./catbox.json";

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ceiling on the summed envelope sizes, 0 disables size accounting
    pub max_byte_size: u64,
    /// Quiet period between a mutation and the file rewrite it triggers
    pub save_debounce: Duration,
    /// Path of the JSON cache file
    pub cache_file: PathBuf,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CATBOX_MAX_BYTE_SIZE` - Byte ceiling, 0 disables it (default: 104857600)
    /// - `CATBOX_SAVE_DEBOUNCE_MS` - Save debounce in milliseconds (default: 500)
    /// - `CATBOX_CACHE_FILE` - Cache file path (default: ./catbox.json)
    ///
    /// Unset variables fall back to defaults; set but unparseable ones are
    /// rejected with [`CacheError::Construction`].
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            max_byte_size: parse_var("CATBOX_MAX_BYTE_SIZE")?.unwrap_or(defaults.max_byte_size),
            save_debounce: parse_var("CATBOX_SAVE_DEBOUNCE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.save_debounce),
            cache_file: env::var_os("CATBOX_CACHE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_file),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the values that the type system cannot rule out.
    pub fn validate(&self) -> Result<()> {
        if self.cache_file.as_os_str().is_empty() {
            return Err(CacheError::Construction(
                "Invalid cacheFile value: path is empty".to_string(),
            ));
        }

        if self.save_debounce.as_millis() > u128::from(MAX_TIMER_DELAY_MS) {
            return Err(CacheError::Construction(format!(
                "Invalid cache saveDebounce value: must not exceed {} ms",
                MAX_TIMER_DELAY_MS
            )));
        }

        Ok(())
    }

    /// Whether envelopes are sized and checked against the ceiling.
    pub fn size_accounting(&self) -> bool {
        self.max_byte_size > 0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_byte_size: DEFAULT_MAX_BYTE_SIZE,
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            cache_file: PathBuf::from(DEFAULT_CACHE_FILE),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            CacheError::Construction(format!("{} has an invalid value: {:?}", name, raw))
        }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(CacheError::Construction(format!(
            "{} is not valid unicode",
            name
        ))),
    }
}

use std::time::Duration;

use verso_core::error::CoreError;
use verso_core::transaction::{
    IsolationLevel, TransactionOptions, DEFAULT_RETRY_BACKOFF, DEFAULT_RETRY_COUNT,
    DEFAULT_TIMEOUT,
};

/// Default savepoint nesting limit applied by the engine.
pub const DEFAULT_MAX_SAVEPOINT_DEPTH: usize = 32;

/// Transaction engine defaults loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Isolation level when the caller does not choose one.
    pub default_isolation: IsolationLevel,
    /// Whole-transaction timeout, retries included.
    pub timeout: Duration,
    /// Deadlock retries after the first attempt.
    pub deadlock_retries: u32,
    pub retry_backoff: Duration,
    /// Savepoints a unit of work may hold open at once.
    pub max_savepoint_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_isolation: IsolationLevel::default(),
            timeout: DEFAULT_TIMEOUT,
            deadlock_retries: DEFAULT_RETRY_COUNT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_savepoint_depth: DEFAULT_MAX_SAVEPOINT_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `TX_DEFAULT_ISOLATION`   | `read_committed` |
    /// | `TX_TIMEOUT_SECS`        | `30`             |
    /// | `TX_DEADLOCK_RETRIES`    | `3`              |
    /// | `TX_RETRY_BACKOFF_MS`    | `50`             |
    /// | `TX_MAX_SAVEPOINT_DEPTH` | `32`             |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let default_isolation = match lookup("TX_DEFAULT_ISOLATION") {
            Some(value) => IsolationLevel::parse(&value)?,
            None => defaults.default_isolation,
        };
        let timeout = parse_var(&lookup, "TX_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        let deadlock_retries =
            parse_var(&lookup, "TX_DEADLOCK_RETRIES")?.unwrap_or(defaults.deadlock_retries);
        let retry_backoff = parse_var(&lookup, "TX_RETRY_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_backoff);
        let max_savepoint_depth =
            parse_var(&lookup, "TX_MAX_SAVEPOINT_DEPTH")?.unwrap_or(defaults.max_savepoint_depth);

        if timeout.is_zero() {
            return Err(CoreError::Validation(
                "TX_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }

        Ok(Self {
            default_isolation,
            timeout,
            deadlock_retries,
            retry_backoff,
            max_savepoint_depth,
        })
    }

    /// Transaction options seeded from this configuration.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation: self.default_isolation,
            timeout: self.timeout,
            retry_count: self.deadlock_retries,
            retry_backoff: self.retry_backoff,
            label: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, CoreError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
    }
}

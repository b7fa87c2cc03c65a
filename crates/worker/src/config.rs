use std::time::Duration;

use verso_core::error::CoreError;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Pool size (default: `10`).
    pub max_connections: u32,
    /// Pause between retention sweeps (default: one hour).
    pub retention_interval: Duration,
    /// Drop every cached comparison once at start-up (default: `false`).
    pub purge_comparisons_on_start: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default    |
    /// |------------------------------|------------|
    /// | `DATABASE_URL`               | (required) |
    /// | `DB_MAX_CONNECTIONS`         | `10`       |
    /// | `RETENTION_INTERVAL_SECS`    | `3600`     |
    /// | `PURGE_COMPARISONS_ON_START` | `false`    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| CoreError::Validation("DATABASE_URL must be set".into()))?;

        let max_connections: u32 = parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?;
        if max_connections == 0 {
            return Err(CoreError::Validation(
                "DB_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }

        let interval_secs: u64 = parse_or(&lookup, "RETENTION_INTERVAL_SECS", 3600)?;
        if interval_secs == 0 {
            return Err(CoreError::Validation(
                "RETENTION_INTERVAL_SECS must be greater than zero".into(),
            ));
        }

        let purge_comparisons_on_start = parse_or(&lookup, "PURGE_COMPARISONS_ON_START", false)?;

        Ok(Self {
            database_url,
            max_connections,
            retention_interval: Duration::from_secs(interval_secs),
            purge_comparisons_on_start,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
    }
}

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::rating::RatingPolicy;
use crate::swap::{CancelPolicy, LifecyclePolicy};

/// Longest response window a deployment may configure
pub const MAX_RESPONSE_WINDOW_DAYS: i64 = 365;
/// Longest rating edit window a deployment may configure
pub const MAX_EDIT_WINDOW_HOURS: i64 = 24 * 30;

/// Configuration for the skill swap core and its sweep daemon
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillSwapConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Swap lifecycle configuration
    pub swap: SwapConfig,
    /// Rating configuration
    pub rating: RatingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory stores)
    pub postgres_enabled: bool,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/skillswap".to_string(),
            postgres_enabled: false,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Emit span open/close events
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_spans: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    /// Days a receiver has to answer a request
    pub response_window_days: i64,
    pub cancel_policy: CancelPolicy,
    /// Run the expiry sweep in the daemon
    pub sweep_enabled: bool,
    pub sweep_interval_secs: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            response_window_days: 7,
            cancel_policy: CancelPolicy::AllowAfterAccept,
            sweep_enabled: false,
            sweep_interval_secs: 3600,
        }
    }
}

impl SwapConfig {
    pub fn to_lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            response_window: Duration::days(self.response_window_days),
            cancel_policy: self.cancel_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingConfig {
    /// Hours a reviewer may edit or delete a rating
    pub edit_window_hours: i64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            edit_window_hours: 24,
        }
    }
}

impl RatingConfig {
    pub fn to_rating_policy(&self) -> RatingPolicy {
        RatingPolicy {
            edit_window: Duration::hours(self.edit_window_hours),
        }
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value", key))
}

impl SkillSwapConfig {
    /// Load configuration from `SKILLSWAP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, then validate it
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Database configuration
        if let Some(url) = lookup("SKILLSWAP_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        if let Some(enabled) = lookup("SKILLSWAP_POSTGRES_ENABLED") {
            config.database.postgres_enabled = parse_var("SKILLSWAP_POSTGRES_ENABLED", &enabled)?;
        }
        if let Some(max) = lookup("SKILLSWAP_MAX_CONNECTIONS") {
            config.database.max_connections = parse_var("SKILLSWAP_MAX_CONNECTIONS", &max)?;
        }

        // Logging configuration
        if let Some(level) = lookup("SKILLSWAP_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(spans) = lookup("SKILLSWAP_LOG_SPANS") {
            config.logging.log_spans = parse_var("SKILLSWAP_LOG_SPANS", &spans)?;
        }

        // Swap configuration
        if let Some(days) = lookup("SKILLSWAP_RESPONSE_WINDOW_DAYS") {
            config.swap.response_window_days =
                parse_var("SKILLSWAP_RESPONSE_WINDOW_DAYS", &days)?;
        }
        if let Some(policy) = lookup("SKILLSWAP_CANCEL_POLICY") {
            config.swap.cancel_policy = CancelPolicy::parse(policy.trim()).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid SKILLSWAP_CANCEL_POLICY value '{}' \
                     (expected allow-after-accept or pending-only)",
                    policy
                )
            })?;
        }
        if let Some(enabled) = lookup("SKILLSWAP_SWEEP_ENABLED") {
            config.swap.sweep_enabled = parse_var("SKILLSWAP_SWEEP_ENABLED", &enabled)?;
        }
        if let Some(secs) = lookup("SKILLSWAP_SWEEP_INTERVAL_SECS") {
            config.swap.sweep_interval_secs = parse_var("SKILLSWAP_SWEEP_INTERVAL_SECS", &secs)?;
        }

        // Rating configuration
        if let Some(hours) = lookup("SKILLSWAP_EDIT_WINDOW_HOURS") {
            config.rating.edit_window_hours = parse_var("SKILLSWAP_EDIT_WINDOW_HOURS", &hours)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.database.postgres_enabled {
            if self.database.postgres_url.is_empty() {
                return Err(anyhow::anyhow!(
                    "PostgreSQL is enabled but SKILLSWAP_POSTGRES_URL is empty"
                ));
            }
            if !self.database.postgres_url.starts_with("postgres://")
                && !self.database.postgres_url.starts_with("postgresql://")
            {
                return Err(anyhow::anyhow!(
                    "PostgreSQL URL must use the postgres:// or postgresql:// scheme: {}",
                    redact_url(&self.database.postgres_url)
                ));
            }
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be non-zero"));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => return Err(anyhow::anyhow!("Unknown log level: {}", other)),
        }

        if !(1..=MAX_RESPONSE_WINDOW_DAYS).contains(&self.swap.response_window_days) {
            return Err(anyhow::anyhow!(
                "Response window must be between 1 and {} days",
                MAX_RESPONSE_WINDOW_DAYS
            ));
        }
        if self.swap.sweep_enabled && self.swap.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Sweep interval must be non-zero when the sweep is enabled"
            ));
        }
        if !(1..=MAX_EDIT_WINDOW_HOURS).contains(&self.rating.edit_window_hours) {
            return Err(anyhow::anyhow!(
                "Rating edit window must be between 1 and {} hours",
                MAX_EDIT_WINDOW_HOURS
            ));
        }

        Ok(())
    }
}

/// Mask the password of a connection URL for logging
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SkillSwapConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SkillSwapConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_validate() {
        let config = load(&[]).unwrap();
        assert!(!config.database.postgres_enabled);
        let policy = config.swap.to_lifecycle_policy();
        assert_eq!(policy.response_window, Duration::days(7));
        assert_eq!(policy.cancel_policy, CancelPolicy::AllowAfterAccept);
        assert_eq!(config.rating.to_rating_policy().edit_window, Duration::hours(24));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SKILLSWAP_CANCEL_POLICY", "pending-only"),
            ("SKILLSWAP_RESPONSE_WINDOW_DAYS", "3"),
            ("SKILLSWAP_SWEEP_ENABLED", "true"),
            ("SKILLSWAP_SWEEP_INTERVAL_SECS", "60"),
            ("SKILLSWAP_LOG_LEVEL", "debug"),
        ])
        .unwrap();
        assert_eq!(config.swap.cancel_policy, CancelPolicy::PendingOnly);
        assert_eq!(config.swap.response_window_days, 3);
        assert!(config.swap.sweep_enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("SKILLSWAP_POSTGRES_ENABLED", "maybe")]).is_err());
        assert!(load(&[("SKILLSWAP_CANCEL_POLICY", "never")]).is_err());
        assert!(load(&[("SKILLSWAP_EDIT_WINDOW_HOURS", "0")]).is_err());
        assert!(load(&[("SKILLSWAP_RESPONSE_WINDOW_DAYS", "0")]).is_err());
        assert!(load(&[("SKILLSWAP_LOG_LEVEL", "loud")]).is_err());
        assert!(load(&[
            ("SKILLSWAP_POSTGRES_ENABLED", "true"),
            ("SKILLSWAP_POSTGRES_URL", "mysql://localhost/db"),
        ])
        .is_err());
    }

    #[test]
    fn test_window_upper_bounds() {
        assert!(load(&[("SKILLSWAP_RESPONSE_WINDOW_DAYS", "100000000")]).is_err());
        assert!(load(&[("SKILLSWAP_RESPONSE_WINDOW_DAYS", "366")]).is_err());
        assert!(load(&[("SKILLSWAP_EDIT_WINDOW_HOURS", "721")]).is_err());

        let config = load(&[
            ("SKILLSWAP_RESPONSE_WINDOW_DAYS", "365"),
            ("SKILLSWAP_EDIT_WINDOW_HOURS", "720"),
        ])
        .unwrap();
        let policy = config.swap.to_lifecycle_policy();
        assert!(Utc::now().checked_add_signed(policy.response_window).is_some());
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgresql://app:hunter2@db:5432/skillswap"),
            "postgresql://app:***@db:5432/skillswap"
        );
        assert_eq!(
            redact_url("postgresql://localhost:5432/skillswap"),
            "postgresql://localhost:5432/skillswap"
        );
    }
}

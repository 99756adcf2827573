use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::options::{OptimizerOptions, QueryOptions};

pub const DEFAULT_ENDPOINT: &str = "https://spanner.googleapis.com:443";
pub const DEFAULT_NUM_CHANNELS: usize = 4;

/// Client wide settings. Every field can be overridden from the environment
/// with the `SPANLAKE_` prefix, e.g. `SPANLAKE_EMULATOR_HOST=localhost:9010`
/// or `SPANLAKE_SESSION_POOL__MAX_OPENED=50`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Plaintext endpoint of a local emulator; disables TLS and auth.
    pub emulator_host: Option<String>,
    pub num_channels: usize,
    /// Bearer token attached to every call.
    pub access_token: Option<String>,
    /// Look up the instance specific endpoint before connecting.
    pub resource_based_routing: bool,
    pub disable_route_to_leader: bool,
    pub optimizer_version: Option<String>,
    pub optimizer_statistics_package: Option<String>,
    pub enable_metrics: bool,
    /// Log format used by the CLI: "compact" or "json".
    pub log_format: String,
    /// Metric attribution id; generated per client when unset.
    pub client_id: Option<String>,
    pub database_role: Option<String>,
    pub session_labels: HashMap<String, String>,
    pub connect_timeout_ms: u64,
    pub session_pool: SessionPoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            emulator_host: None,
            num_channels: DEFAULT_NUM_CHANNELS,
            access_token: None,
            resource_based_routing: false,
            disable_route_to_leader: false,
            optimizer_version: None,
            optimizer_statistics_package: None,
            enable_metrics: true,
            log_format: "compact".to_string(),
            client_id: None,
            database_role: None,
            session_labels: HashMap::new(),
            connect_timeout_ms: 10_000,
            session_pool: SessionPoolConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults layered with `SPANLAKE_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .with_context(|| "failed to serialize defaults")?;
        let settings = config::Config::builder()
            .add_source(
                config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
            )
            .add_source(
                config::Environment::with_prefix("SPANLAKE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| "failed to load configuration")?;
        let cfg: ClientConfig = settings
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_channels == 0 {
            return Err(Error::invalid_argument(
                "ClientConfig.num_channels must be greater than 0",
            ));
        }
        if self.emulator_host.is_none() && self.endpoint.is_empty() {
            return Err(Error::invalid_argument("ClientConfig.endpoint must not be empty"));
        }
        if self.session_labels.keys().any(|k| k.is_empty()) {
            return Err(Error::invalid_argument("session label keys must not be empty"));
        }
        self.session_pool.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Query defaults every call falls back to.
    pub(crate) fn query_options(&self) -> QueryOptions {
        QueryOptions {
            optimizer: OptimizerOptions {
                version: self.optimizer_version.clone(),
                statistics_package: self.optimizer_statistics_package.clone(),
            },
            ..Default::default()
        }
    }
}

/// What the maintainer does with sessions held past the long-running
/// threshold by callers that did not declare long-running work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveTransactionAction {
    NoAction,
    #[default]
    Warn,
    Close,
    WarnAndClose,
}

impl InactiveTransactionAction {
    pub fn warns(self) -> bool {
        matches!(self, Self::Warn | Self::WarnAndClose)
    }

    pub fn closes(self) -> bool {
        matches!(self, Self::Close | Self::WarnAndClose)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InactiveTransactionRemovalConfig {
    pub action: InactiveTransactionAction,
    pub execution_frequency_ms: u64,
    /// Checkout age after which a session counts as leaked.
    pub idle_time_threshold_ms: u64,
    /// Fraction of `max_opened` in use above which the check runs.
    pub used_sessions_ratio_threshold: f64,
}

impl Default for InactiveTransactionRemovalConfig {
    fn default() -> Self {
        Self {
            action: InactiveTransactionAction::Warn,
            execution_frequency_ms: 2 * 60_000,
            idle_time_threshold_ms: 60 * 60_000,
            used_sessions_ratio_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionPoolConfig {
    pub min_opened: u64,
    pub max_opened: u64,
    pub max_idle: u64,
    /// Creation RPCs allowed in flight at once.
    pub max_burst: u64,
    /// Fraction of sessions prepared with a read-write transaction.
    pub write_sessions: f64,
    /// Period of the maintenance tick.
    pub maintenance_interval_ms: u64,
    /// Idle sessions unused for this long are pinged to keep them alive.
    pub health_check_interval_ms: u64,
    pub health_check_workers: usize,
    pub idle_session_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Capture a backtrace at every checkout for leak reports.
    pub track_session_handles: bool,
    pub inactive_transaction_removal: InactiveTransactionRemovalConfig,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            min_opened: 100,
            max_opened: 400,
            max_idle: 0,
            max_burst: 10,
            write_sessions: 0.2,
            maintenance_interval_ms: 60_000,
            health_check_interval_ms: 50 * 60_000,
            health_check_workers: 10,
            idle_session_timeout_ms: 60 * 60_000,
            acquire_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
            track_session_handles: false,
            inactive_transaction_removal: InactiveTransactionRemovalConfig::default(),
        }
    }
}

impl SessionPoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_opened == 0 {
            return Err(Error::invalid_argument(
                "SessionPoolConfig.max_opened must be greater than 0",
            ));
        }
        if self.min_opened > self.max_opened {
            return Err(Error::invalid_argument(format!(
                "SessionPoolConfig.min_opened ({}) exceeds max_opened ({})",
                self.min_opened, self.max_opened
            )));
        }
        if self.max_burst == 0 {
            return Err(Error::invalid_argument(
                "SessionPoolConfig.max_burst must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.write_sessions) {
            return Err(Error::invalid_argument(format!(
                "SessionPoolConfig.write_sessions must be between 0.0 and 1.0, got {}",
                self.write_sessions
            )));
        }
        if self.health_check_workers == 0 {
            return Err(Error::invalid_argument(
                "SessionPoolConfig.health_check_workers must be greater than 0",
            ));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(Error::invalid_argument(
                "SessionPoolConfig.maintenance_interval_ms must be greater than 0",
            ));
        }
        let ratio = self.inactive_transaction_removal.used_sessions_ratio_threshold;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::invalid_argument(format!(
                "used_sessions_ratio_threshold must be between 0.0 and 1.0, got {ratio}"
            )));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ClientConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.num_channels, 4);
        assert_eq!(cfg.session_pool.max_opened, 400);
        assert_eq!(
            cfg.session_pool.inactive_transaction_removal.action,
            InactiveTransactionAction::Warn
        );
    }

    #[test]
    fn pool_bounds_are_checked() {
        let pool = SessionPoolConfig {
            min_opened: 10,
            max_opened: 5,
            ..Default::default()
        };
        let err = pool.validate().unwrap_err();
        assert!(err.message().contains("exceeds max_opened"));

        let pool = SessionPoolConfig {
            write_sessions: 1.5,
            ..Default::default()
        };
        assert!(pool.validate().is_err());
    }

    #[test]
    fn optimizer_settings_become_query_defaults() {
        let cfg = ClientConfig {
            optimizer_version: Some("5".to_string()),
            ..Default::default()
        };
        let opts = cfg.query_options();
        assert_eq!(opts.optimizer.version.as_deref(), Some("5"));
        assert!(opts.optimizer.statistics_package.is_none());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = ClientConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_pool, cfg.session_pool);
        let partial: SessionPoolConfig = serde_json::from_str(r#"{"max_opened": 7}"#).unwrap();
        assert_eq!(partial.max_opened, 7);
        assert_eq!(partial.min_opened, 100);
    }
}

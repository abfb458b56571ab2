//! Configuration loading and management
//!
//! Configuration is read once, at process start, into [`WorkflowConfig`] and
//! passed down explicitly. Nothing below this module reads the environment.

use crate::core::error::ConfigError;
use crate::core::store::{IsolationLevel, TransactionOptions};
use ::config::{Config, Environment, Map};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Connection pool bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long to wait for a free connection before failing
    pub acquire_timeout: Duration,
    /// How long an unused connection stays open
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_millis(30_000),
            idle_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Where and how to reach the relational store
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Fixed session time zone, e.g. `+00:00`
    pub timezone: String,
    pub charset: String,
    pub collation: String,
    pub connect_timeout: Duration,
    pub pool: PoolConfig,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"***")
            .field("timezone", &self.timezone)
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("connect_timeout", &self.connect_timeout)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Settings applied to every order transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionConfig {
    pub options: TransactionOptions,
}

/// Bounded retry around lock contention
///
/// `max_attempts = 1` means no retry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Linear backoff before `attempt` (1-based)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * attempt.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Complete configuration for one workflow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub database: DatabaseConfig,
    pub transaction: TransactionConfig,
    pub retry: RetryPolicy,
    /// Prefix of generated order numbers
    pub order_number_prefix: String,
}

/// Variables as they appear in the environment, keys lowercased
#[derive(Debug, Deserialize)]
struct EnvVars {
    db_host: Option<String>,
    db_port: u16,
    db_name: Option<String>,
    db_user: Option<String>,
    db_password: Option<String>,
    db_pool_max: u32,
    db_pool_min: u32,
    db_pool_acquire_ms: u64,
    db_pool_idle_ms: u64,
    db_connect_timeout_ms: u64,
    db_timezone: String,
    db_charset: String,
    db_collation: String,
    order_tx_isolation: String,
    order_tx_timeout_ms: u64,
    order_lock_wait_timeout_s: u64,
    order_retry_max_attempts: u32,
    order_retry_backoff_ms: u64,
    order_number_prefix: String,
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl WorkflowConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default())
    }

    /// Load configuration from an explicit set of variables
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::load(Environment::default().source(Some(vars)))
    }

    /// Required: `DB_HOST`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`. Every other
    /// variable falls back to a default. Nothing is connected here, so a
    /// missing variable fails before any network activity.
    fn load(source: Environment) -> Result<Self, ConfigError> {
        let pool_defaults = PoolConfig::default();
        let tx_defaults = TransactionOptions::default();
        let retry_defaults = RetryPolicy::default();

        let vars: EnvVars = Config::builder()
            .set_default("db_port", 3306_i64)?
            .set_default("db_pool_max", i64::from(pool_defaults.max_connections))?
            .set_default("db_pool_min", i64::from(pool_defaults.min_connections))?
            .set_default("db_pool_acquire_ms", millis(pool_defaults.acquire_timeout))?
            .set_default("db_pool_idle_ms", millis(pool_defaults.idle_timeout))?
            .set_default("db_connect_timeout_ms", 60_000_i64)?
            .set_default("db_timezone", "+00:00")?
            .set_default("db_charset", "utf8mb4")?
            .set_default("db_collation", "utf8mb4_unicode_ci")?
            .set_default("order_tx_isolation", tx_defaults.isolation_level.as_sql())?
            .set_default("order_tx_timeout_ms", millis(tx_defaults.timeout))?
            .set_default(
                "order_lock_wait_timeout_s",
                i64::try_from(tx_defaults.lock_wait_timeout.as_secs()).unwrap_or(i64::MAX),
            )?
            .set_default("order_retry_max_attempts", i64::from(retry_defaults.max_attempts))?
            .set_default("order_retry_backoff_ms", millis(retry_defaults.backoff))?
            .set_default("order_number_prefix", "TEST")?
            .add_source(source)
            .build()?
            .try_deserialize()
            .map_err(invalid_value)?;

        let pool = PoolConfig {
            max_connections: vars.db_pool_max,
            min_connections: vars.db_pool_min,
            acquire_timeout: Duration::from_millis(vars.db_pool_acquire_ms),
            idle_timeout: Duration::from_millis(vars.db_pool_idle_ms),
        };
        if pool.max_connections == 0 || pool.min_connections > pool.max_connections {
            return Err(ConfigError::InvalidValue {
                name: "DB_POOL_MAX".to_string(),
                message: format!(
                    "pool bounds min={} max={} are inconsistent",
                    pool.min_connections, pool.max_connections
                ),
            });
        }

        let database = DatabaseConfig {
            host: required("DB_HOST", vars.db_host)?,
            port: vars.db_port,
            name: required("DB_NAME", vars.db_name)?,
            user: required("DB_USER", vars.db_user)?,
            // Must be set, but may be set to an empty string
            password: vars.db_password.ok_or_else(|| ConfigError::MissingVariable {
                name: "DB_PASSWORD".to_string(),
            })?,
            timezone: non_empty("DB_TIMEZONE", vars.db_timezone)?,
            charset: token("DB_CHARSET", vars.db_charset, |c| {
                c.is_ascii_alphanumeric() || c == '_'
            })?,
            collation: token("DB_COLLATION", vars.db_collation, |c| {
                c.is_ascii_alphanumeric() || c == '_'
            })?,
            connect_timeout: Duration::from_millis(vars.db_connect_timeout_ms),
            pool,
        };

        let isolation_level =
            vars.order_tx_isolation
                .parse::<IsolationLevel>()
                .map_err(|e| ConfigError::InvalidValue {
                    name: "ORDER_TX_ISOLATION".to_string(),
                    message: e.to_string(),
                })?;
        let transaction = TransactionConfig {
            options: TransactionOptions {
                isolation_level,
                timeout: Duration::from_millis(vars.order_tx_timeout_ms),
                lock_wait_timeout: Duration::from_secs(vars.order_lock_wait_timeout_s),
            },
        };

        let retry = RetryPolicy {
            max_attempts: vars.order_retry_max_attempts.max(1),
            backoff: Duration::from_millis(vars.order_retry_backoff_ms),
        };

        let order_number_prefix = token("ORDER_NUMBER_PREFIX", vars.order_number_prefix, |c| {
            c.is_ascii_alphanumeric() || c == '_' || c == '-'
        })?;

        Ok(Self {
            database,
            transaction,
            retry,
            order_number_prefix,
        })
    }
}

/// Name the offending variable when the source reports a typed key
fn invalid_value(err: ::config::ConfigError) -> ConfigError {
    if let ::config::ConfigError::Type { key: Some(key), .. } = &err {
        return ConfigError::InvalidValue {
            name: key.to_uppercase(),
            message: err.to_string(),
        };
    }
    ConfigError::Load(err)
}

fn required(name: &str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingVariable {
            name: name.to_string(),
        })
}

fn non_empty(name: &str, value: String) -> Result<String, ConfigError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(value)
}

/// A value sqlx interpolates into session SQL; restricted to `allowed` characters
fn token(name: &str, value: String, allowed: impl Fn(char) -> bool) -> Result<String, ConfigError> {
    let value = non_empty(name, value)?;
    if !value.chars().all(allowed) {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{}' contains unsupported characters", value),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<WorkflowConfig, ConfigError> {
        WorkflowConfig::from_vars(pairs.iter().copied())
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("DB_HOST", "localhost"),
        ("DB_NAME", "bakery"),
        ("DB_USER", "root"),
        ("DB_PASSWORD", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(REQUIRED).unwrap();

        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.timezone, "+00:00");
        assert_eq!(config.database.charset, "utf8mb4");
        assert_eq!(config.database.pool, PoolConfig::default());
        assert_eq!(
            config.transaction.options.isolation_level,
            IsolationLevel::ReadCommitted
        );
        assert_eq!(config.transaction.options.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.order_number_prefix, "TEST");
    }

    #[test]
    fn test_missing_host_fails() {
        let err = load(&[
            ("DB_NAME", "bakery"),
            ("DB_USER", "root"),
            ("DB_PASSWORD", "secret"),
        ])
        .unwrap_err();

        assert!(matches!(err, ConfigError::MissingVariable { ref name } if name == "DB_HOST"));
    }

    #[test]
    fn test_empty_password_is_allowed_but_absent_is_not() {
        let mut pairs = REQUIRED[..3].to_vec();
        assert!(load(&pairs).is_err());

        pairs.push(("DB_PASSWORD", ""));
        let config = load(&pairs).unwrap();
        assert_eq!(config.database.password, "");
    }

    #[test]
    fn test_overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("DB_PORT", "3307"),
            ("DB_POOL_MAX", "10"),
            ("DB_POOL_MIN", "2"),
            ("DB_TIMEZONE", "+01:00"),
            ("ORDER_TX_ISOLATION", "serializable"),
            ("ORDER_TX_TIMEOUT_MS", "5000"),
            ("ORDER_RETRY_MAX_ATTEMPTS", "3"),
        ]);
        let config = load(&pairs).unwrap();

        assert_eq!(config.database.port, 3307);
        assert_eq!(config.database.pool.max_connections, 10);
        assert_eq!(config.database.pool.min_connections, 2);
        assert_eq!(config.database.timezone, "+01:00");
        assert_eq!(
            config.transaction.options.isolation_level,
            IsolationLevel::Serializable
        );
        assert_eq!(config.transaction.options.timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DB_PORT", "not-a-port"));
        let err = load(&pairs).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "DB_PORT"));
    }

    #[test]
    fn test_charset_cannot_inject_sql() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DB_CHARSET", "utf8mb4; DROP TABLE orders"));
        let err = load(&pairs).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "DB_CHARSET"));
    }

    #[test]
    fn test_blank_host_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("DB_HOST", "   ");
        let err = load(&pairs).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_MISSING_VARIABLE");
    }

    #[test]
    fn test_unknown_isolation_level_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ORDER_TX_ISOLATION", "SNAPSHOT"));
        let err = load(&pairs).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "ORDER_TX_ISOLATION"));
    }

    #[test]
    fn test_unrelated_variables_are_ignored() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("PATH", "/usr/bin"), ("HOME", "/root")]);
        assert!(load(&pairs).is_ok());
    }

    #[test]
    fn test_inconsistent_pool_bounds_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("DB_POOL_MAX", "2"), ("DB_POOL_MIN", "4")]);
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = load(REQUIRED).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_retry_backoff_is_linear() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use crate::infrastructure::circuit_breaker::CircuitBreakerConfig;
use crate::infrastructure::logging::LoggingConfig;
use crate::infrastructure::notification::NotificationConfig;
use crate::infrastructure::rate_limiter::RateLimitConfig;
use crate::infrastructure::resilience::ResilienceConfig;
use crate::infrastructure::retry::RetryConfig;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    InMemory,
    Sqlite { url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreBackend,
    pub seed_demo_accounts: bool,
    pub resilience: ResilienceConfig,
    pub conflict_retry: RetryConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreBackend::InMemory,
            seed_demo_accounts: true,
            resilience: ResilienceConfig::default(),
            conflict_retry: RetryConfig::for_conflicts(),
            notification: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let defaults = AppConfig::default();

        let server = ServerConfig {
            host: env.string("HOST", defaults.server.host),
            port: env.parse("PORT", defaults.server.port)?,
        };

        let store = match env.string("ACCOUNT_STORE", "memory".to_string()).to_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => StoreBackend::InMemory,
            "sqlite" => StoreBackend::Sqlite {
                url: env.string("DATABASE_URL", "sqlite::memory:".to_string()),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "ACCOUNT_STORE",
                    value: other.to_string(),
                    reason: "expected 'memory' or 'sqlite'".to_string(),
                })
            }
        };

        let rate_limit = RateLimitConfig {
            limit_for_period: env.parse("RATE_LIMIT_FOR_PERIOD", defaults.resilience.rate_limit.limit_for_period)?,
            limit_refresh_period: env.millis(
                "RATE_LIMIT_REFRESH_PERIOD_MS",
                defaults.resilience.rate_limit.limit_refresh_period,
            )?,
        };

        let cb = &defaults.resilience.circuit_breaker;
        let circuit_breaker = CircuitBreakerConfig {
            failure_rate_threshold: env.parse("CIRCUIT_FAILURE_RATE_THRESHOLD", cb.failure_rate_threshold)?,
            sliding_window_size: env.parse("CIRCUIT_SLIDING_WINDOW_SIZE", cb.sliding_window_size)?,
            minimum_number_of_calls: env.parse("CIRCUIT_MINIMUM_CALLS", cb.minimum_number_of_calls)?,
            wait_duration_in_open_state: env.millis("CIRCUIT_WAIT_DURATION_OPEN_MS", cb.wait_duration_in_open_state)?,
            permitted_calls_in_half_open: env.parse("CIRCUIT_HALF_OPEN_CALLS", cb.permitted_calls_in_half_open)?,
        };
        if !(0.0..=100.0).contains(&circuit_breaker.failure_rate_threshold) {
            return Err(ConfigError::Invalid {
                name: "CIRCUIT_FAILURE_RATE_THRESHOLD",
                value: circuit_breaker.failure_rate_threshold.to_string(),
                reason: "must be a percentage between 0 and 100".to_string(),
            });
        }

        let retry = env.retry("RETRY", &defaults.resilience.retry)?;
        let conflict_retry = env.retry("CONFLICT_RETRY", &defaults.conflict_retry)?;

        let resilience = ResilienceConfig {
            rate_limit,
            circuit_breaker,
            retry,
            timeout: env.millis("WITHDRAWAL_TIMEOUT_MS", defaults.resilience.timeout)?,
            retry_after: Duration::from_secs(
                env.parse("RETRY_AFTER_SECS", defaults.resilience.retry_after.as_secs())?,
            ),
        };

        let notification = NotificationConfig {
            topic: env.string("NOTIFICATION_TOPIC", defaults.notification.topic),
            buffer: env.parse("NOTIFICATION_BUFFER", defaults.notification.buffer)?,
            simulate_delay: env.parse("NOTIFICATION_SIMULATE_DELAY", defaults.notification.simulate_delay)?,
            failure_rate: env.parse("NOTIFICATION_FAILURE_RATE", defaults.notification.failure_rate)?,
            ..defaults.notification
        };

        let logging = LoggingConfig {
            log_dir: env.string("LOG_DIR", defaults.logging.log_dir),
            log_level: env.parse("LOG_LEVEL", defaults.logging.log_level)?,
            enable_file: env.parse("LOG_TO_FILE", defaults.logging.enable_file)?,
            ..defaults.logging
        };

        Ok(Self {
            server,
            store,
            seed_demo_accounts: env.parse("SEED_DEMO_ACCOUNTS", defaults.seed_demo_accounts)?,
            resilience,
            conflict_retry,
            notification,
            logging,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: String) -> String {
        self.raw(name).unwrap_or(default)
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn millis(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let ms: u64 = self.parse(name, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }

    fn retry(&self, prefix: &'static str, defaults: &RetryConfig) -> Result<RetryConfig, ConfigError> {
        let (attempts, initial, multiplier, max_delay) = match prefix {
            "CONFLICT_RETRY" => (
                "CONFLICT_RETRY_MAX_ATTEMPTS",
                "CONFLICT_RETRY_INITIAL_DELAY_MS",
                "CONFLICT_RETRY_MULTIPLIER",
                "CONFLICT_RETRY_MAX_DELAY_MS",
            ),
            _ => (
                "RETRY_MAX_ATTEMPTS",
                "RETRY_INITIAL_DELAY_MS",
                "RETRY_MULTIPLIER",
                "RETRY_MAX_DELAY_MS",
            ),
        };

        let config = RetryConfig {
            max_attempts: self.parse(attempts, defaults.max_attempts)?,
            initial_delay: self.millis(initial, defaults.initial_delay)?,
            multiplier: self.parse(multiplier, defaults.multiplier)?,
            max_delay: self.millis(max_delay, defaults.max_delay)?,
        };
        if config.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: attempts,
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        if config.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                name: multiplier,
                value: config.multiplier.to_string(),
                reason: "backoff multiplier must be >= 1.0".to_string(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_match_policy_constants() {
        let config = AppConfig::from_map(&HashMap::new()).unwrap();

        assert_eq!(config.store, StoreBackend::InMemory);
        assert!(config.seed_demo_accounts);
        assert_eq!(config.resilience.retry.max_attempts, 3);
        assert_eq!(config.resilience.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(config.resilience.retry.max_delay, Duration::from_secs(2));
        assert_eq!(config.conflict_retry.max_attempts, 5);
        assert_eq!(config.conflict_retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.resilience.timeout, Duration::from_secs(30));
        assert_eq!(config.resilience.retry_after, Duration::from_secs(30));
        assert_eq!(config.resilience.rate_limit.limit_for_period, 100);
        assert_eq!(config.resilience.circuit_breaker.sliding_window_size, 10);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_map(&vars(&[
            ("PORT", "9090"),
            ("ACCOUNT_STORE", "sqlite"),
            ("DATABASE_URL", "sqlite://accounts.db"),
            ("SEED_DEMO_ACCOUNTS", "false"),
            ("RATE_LIMIT_FOR_PERIOD", "5"),
            ("CIRCUIT_WAIT_DURATION_OPEN_MS", "1500"),
            ("CONFLICT_RETRY_MULTIPLIER", "1.5"),
            ("LOG_LEVEL", "debug"),
            ("LOG_TO_FILE", "true"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.store,
            StoreBackend::Sqlite {
                url: "sqlite://accounts.db".to_string()
            }
        );
        assert!(!config.seed_demo_accounts);
        assert_eq!(config.resilience.rate_limit.limit_for_period, 5);
        assert_eq!(
            config.resilience.circuit_breaker.wait_duration_in_open_state,
            Duration::from_millis(1500)
        );
        assert_eq!(config.conflict_retry.multiplier, 1.5);
        assert_eq!(config.resilience.retry.multiplier, 2.0);
        assert_eq!(config.logging.log_level, Level::DEBUG);
        assert!(config.logging.enable_file);
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = AppConfig::from_map(&vars(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));

        let err = AppConfig::from_map(&vars(&[("ACCOUNT_STORE", "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ACCOUNT_STORE", .. }));

        let err = AppConfig::from_map(&vars(&[("RETRY_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "RETRY_MAX_ATTEMPTS", .. }));

        let err = AppConfig::from_map(&vars(&[("CIRCUIT_FAILURE_RATE_THRESHOLD", "150")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "CIRCUIT_FAILURE_RATE_THRESHOLD",
                ..
            }
        ));
    }
}

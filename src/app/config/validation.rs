use super::{Config, ConfigError};
use url::Url;

/// Upper bound on per-event delivery retries.
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Longest accepted duration setting: one day.
pub const MAX_DURATION_SECS: f64 = 86_400.0;

fn check_seconds(name: &str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 || (!allow_zero && value == 0.0) {
        let bound = if allow_zero { ">= 0" } else { "> 0" };
        return Err(ConfigError::InvalidConfig(format!(
            "{name} must be a finite number of seconds {bound}, got {value}"
        )));
    }
    if value > MAX_DURATION_SECS {
        return Err(ConfigError::InvalidConfig(format!(
            "{name} must be at most {MAX_DURATION_SECS} seconds, got {value}"
        )));
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate collector URL
        let url = Url::parse(&self.server_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid server URL '{}': {}", self.server_url, e))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl(format!(
                "Server URL '{}' must use ws:// or wss://",
                self.server_url
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidUrl(format!(
                "Server URL '{}' has no host",
                self.server_url
            )));
        }

        // Validate credentials
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "project_id must not be empty".to_string(),
            ));
        }
        if self.project_secret.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "project_secret must not be empty".to_string(),
            ));
        }

        // Validate batching
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        if self.max_size != 0 && self.max_size < self.batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Queue size ({}) must be at least as large as batch size ({})",
                self.max_size, self.batch_size
            )));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidConfig(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.max_retries
            )));
        }

        // Validate durations
        check_seconds("batch_interval", self.batch_interval, false)?;
        check_seconds("retry_delay", self.retry_delay, true)?;
        check_seconds("initial_retry_delay", self.initial_retry_delay, true)?;
        check_seconds("max_retry_delay", self.max_retry_delay, true)?;
        check_seconds("ping_interval", self.ping_interval, true)?;
        check_seconds("ping_timeout", self.ping_timeout, self.ping_interval == 0.0)?;
        check_seconds("connect_timeout", self.connect_timeout, false)?;
        check_seconds("send_timeout", self.send_timeout, false)?;
        check_seconds("shutdown_timeout", self.shutdown_timeout, true)?;
        check_seconds("metrics_interval", self.metrics_interval, true)?;

        if self.initial_retry_delay > self.max_retry_delay {
            return Err(ConfigError::InvalidConfig(format!(
                "initial_retry_delay ({}) must not exceed max_retry_delay ({})",
                self.initial_retry_delay, self.max_retry_delay
            )));
        }

        // Validate reconnect policy
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "retry_multiplier must be >= 1, got {}",
                self.retry_multiplier
            )));
        }
        if self.max_retry_attempts < -1 {
            return Err(ConfigError::InvalidConfig(format!(
                "max_retry_attempts must be -1 (unbounded) or >= 0, got {}",
                self.max_retry_attempts
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            server_url: "ws://localhost:8080/logs".to_string(),
            project_id: "proj".to_string(),
            project_secret: "secret".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_with_credentials_are_valid() {
        valid().validate().unwrap();
    }

    #[test]
    fn rejects_non_websocket_urls() {
        for url in ["http://localhost/logs", "localhost:8080", "wss://"] {
            let config = Config {
                server_url: url.to_string(),
                ..valid()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidUrl(_))),
                "{url}"
            );
        }
    }

    #[test]
    fn rejects_missing_credentials() {
        let config = Config {
            project_secret: "  ".to_string(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_numbers() {
        let cases = [
            Config {
                batch_size: 0,
                ..valid()
            },
            Config {
                max_size: 10,
                batch_size: 20,
                ..valid()
            },
            Config {
                batch_interval: 0.0,
                ..valid()
            },
            Config {
                retry_delay: -1.0,
                ..valid()
            },
            Config {
                connect_timeout: f64::NAN,
                ..valid()
            },
            Config {
                retry_multiplier: 0.5,
                ..valid()
            },
            Config {
                max_retry_attempts: -2,
                ..valid()
            },
            Config {
                max_retries: MAX_RETRIES_LIMIT + 1,
                ..valid()
            },
            Config {
                initial_retry_delay: 120.0,
                ..valid()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn rejects_durations_beyond_a_day() {
        let cases = [
            Config {
                batch_interval: 1e19,
                ..valid()
            },
            Config {
                shutdown_timeout: MAX_DURATION_SECS + 1.0,
                ..valid()
            },
            Config {
                max_retry_delay: 1e300,
                ..valid()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidConfig(_))),
                "{config:?}"
            );
        }

        let longest = Config {
            metrics_interval: MAX_DURATION_SECS,
            ..valid()
        };
        longest.validate().unwrap();
    }

    #[test]
    fn unbounded_queue_and_disabled_heartbeat_are_valid() {
        let config = Config {
            max_size: 0,
            ping_interval: 0.0,
            ping_timeout: 0.0,
            max_retry_attempts: -1,
            ..valid()
        };
        config.validate().unwrap();
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::AgentError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Agent configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector address, `host:port` or a full URL
    pub address: String,
    /// Period between deliveries to the collector
    pub report_interval: Duration,
    /// Period between samples
    pub poll_interval: Duration,
    /// Number of concurrent sender workers
    pub rate_limit: usize,
    /// Shared secret used to sign request bodies
    pub key: Option<String>,
    /// Per-request timeout of the HTTP client
    pub request_timeout: Duration,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            report_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            rate_limit: 1,
            key: None,
            request_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        let defaults = Self::default();
        let config = Self {
            address: env::var("ADDRESS").unwrap_or(defaults.address),
            report_interval: env_secs("REPORT_INTERVAL", defaults.report_interval)?,
            poll_interval: env_secs("POLL_INTERVAL", defaults.poll_interval)?,
            rate_limit: env_parse("RATE_LIMIT", defaults.rate_limit)?,
            key: env::var("KEY").ok().filter(|k| !k.is_empty()),
            request_timeout: env_secs("REQUEST_TIMEOUT", defaults.request_timeout)?,
            log_level: env::var("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.address.trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "ADDRESS cannot be empty".to_string(),
            ));
        }
        if self.report_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(AgentError::InvalidConfig(
                "REPORT_INTERVAL and POLL_INTERVAL must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit == 0 {
            return Err(AgentError::InvalidConfig(
                "RATE_LIMIT must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(AgentError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Base URL of the collector. A bare `host:port` is taken as plain HTTP.
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, AgentError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            AgentError::InvalidConfig(format!("{name} has an invalid value '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration, AgentError> {
    env_parse(name, default.as_secs()).map(Duration::from_secs)
}

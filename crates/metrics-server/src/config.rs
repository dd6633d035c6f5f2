// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ServerError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";
const MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub address: String,
    /// Period between snapshot saves; zero saves after every write
    pub store_interval: Duration,
    pub file_storage_path: PathBuf,
    /// Load the snapshot file at startup
    pub restore: bool,
    /// SQLite DSN; when set the database replaces the in-memory store and snapshot file
    pub database_dsn: Option<String>,
    /// Shared secret for request and response signatures
    pub key: Option<String>,
    pub log_level: String,
    /// Largest accepted request body, before decompression
    pub max_content_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            store_interval: Duration::from_secs(300),
            file_storage_path: PathBuf::from(DEFAULT_FILE_STORAGE_PATH),
            restore: true,
            database_dsn: None,
            key: None,
            log_level: "info".to_string(),
            max_content_length: MAX_CONTENT_LENGTH,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ServerError> {
        let defaults = Self::default();
        let store_interval = match env::var("STORE_INTERVAL") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| {
                    ServerError::InvalidConfig(format!(
                        "STORE_INTERVAL has an invalid value '{raw}'"
                    ))
                })?,
            Err(_) => defaults.store_interval,
        };

        let config = Self {
            address: env::var("ADDRESS").unwrap_or(defaults.address),
            store_interval,
            file_storage_path: env::var("FILE_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_storage_path),
            restore: match env::var("RESTORE") {
                Ok(raw) => parse_bool(&raw).ok_or_else(|| {
                    ServerError::InvalidConfig(format!("RESTORE has an invalid value '{raw}'"))
                })?,
                Err(_) => defaults.restore,
            },
            database_dsn: env::var("DATABASE_DSN").ok().filter(|dsn| !dsn.is_empty()),
            key: env::var("KEY").ok().filter(|key| !key.is_empty()),
            log_level: env::var("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            max_content_length: defaults.max_content_length,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.address.trim().is_empty() {
            return Err(ServerError::InvalidConfig(
                "ADDRESS cannot be empty".to_string(),
            ));
        }
        if self.database_dsn.is_none() && self.file_storage_path.as_os_str().is_empty() {
            return Err(ServerError::InvalidConfig(
                "FILE_STORAGE_PATH cannot be empty".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ServerError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

/// Accepts `1`, `t`, `true`, `0`, `f` and `false` in any case.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

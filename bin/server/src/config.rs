//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys use
//! `__`, e.g. `TRIGGER__PUBLIC_BASE_URL`.
//!
//! See [`TriggerSettings`] for listener configuration.

use missionctl_trigger::TriggerSettings;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Endpoint that starts workflow executions.
    #[serde(default = "default_execution_url")]
    pub execution_url: String,

    /// Upper bound on listener teardown during shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    /// Trigger listener configuration.
    #[serde(default)]
    pub trigger: TriggerSettings,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_execution_url() -> String {
    "http://localhost:8080/executions".to_string()
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            execution_url: default_execution_url(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            trigger: TriggerSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

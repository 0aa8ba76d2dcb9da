//! Configuration handling for the stack binary.
//!
//! Values come from a YAML file (defaults when it is missing or unreadable)
//! and are then overridden by environment variables.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Stack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Name announced when sessions are created
    pub session_name: String,
    /// Per-request timeout (milliseconds)
    pub operation_timeout_ms: u64,
    /// Simulated latency of the loopback server (milliseconds)
    pub loopback_latency_ms: u64,
    /// Discovery registration announced at startup
    pub discovery: DiscoveryConfig,
}

/// Discovery registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Whether to register with the discovery server
    pub enabled: bool,
    /// Application URI of this server
    pub server_uri: String,
    /// Product URI of this server
    pub product_uri: String,
    /// URLs announced to clients
    pub discovery_urls: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_uri: "urn:localhost:opc-stack:server".to_string(),
            product_uri: "urn:opc-stack".to_string(),
            discovery_urls: vec!["opc.tcp://localhost:4840".to_string()],
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            session_name: "opc-stack session".to_string(),
            operation_timeout_ms: 2_000,
            loopback_latency_ms: 5,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl StackConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<StackConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final stack configuration: session_name={}, operation_timeout={}ms, loopback_latency={}ms",
            config.session_name, config.operation_timeout_ms, config.loopback_latency_ms
        );

        Ok(config)
    }

    /// Per-request timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Loopback server latency
    pub fn loopback_latency(&self) -> Duration {
        Duration::from_millis(self.loopback_latency_ms)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("STACK_OPERATION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.operation_timeout_ms = ms;
                info!("Operation timeout overridden by environment: {}ms", ms);
            }
        }

        if let Ok(latency) = std::env::var("STACK_LOOPBACK_LATENCY_MS") {
            if let Ok(ms) = latency.parse::<u64>() {
                self.loopback_latency_ms = ms;
                info!("Loopback latency overridden by environment: {}ms", ms);
            }
        }

        if let Ok(name) = std::env::var("STACK_SESSION_NAME") {
            self.session_name = name;
            info!("Session name overridden by environment: {}", self.session_name);
        }
    }
}

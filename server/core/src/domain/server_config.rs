// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Server Configuration Types
//
// Defines the configuration schema for a leasehold state server:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Lease duration and expiration sweep settings
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "leasehold/v1";
pub const KIND: &str = "ServerConfig";

/// Top-level Kubernetes-style server configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfigManifest {
    /// API version (must be "leasehold/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ServerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: ServerConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable server name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigSpec {
    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lease duration granted to clients, in seconds
    #[serde(default = "default_lease_time")]
    pub lease_time_seconds: u64,

    /// How often unconfirmed idle clients are swept.
    /// Default: a quarter of the lease time (at least 1s)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaper_interval_seconds: Option<u64>,

    #[serde(default = "default_true")]
    pub reaper_enabled: bool,
}

impl LeaseConfig {
    /// Sweep interval in seconds; never below 1.
    pub fn effective_reaper_interval(&self) -> u64 {
        self.reaper_interval_seconds
            .unwrap_or(self.lease_time_seconds / 4)
            .max(1)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_time_seconds: default_lease_time(),
            reaper_interval_seconds: None,
            reaper_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_lease_time() -> u64 {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for ServerConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "leasehold".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ServerConfigSpec::default(),
        }
    }
}

impl ServerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. LEASEHOLD_CONFIG_PATH environment variable
    /// 2. ./leasehold-config.yaml (working directory)
    /// 3. ~/.leasehold/config.yaml (user home)
    /// 4. /etc/leasehold/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("LEASEHOLD_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./leasehold-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".leasehold").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/leasehold/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LEASEHOLD_LEASE_TIME") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    tracing::info!("Environment override: LEASEHOLD_LEASE_TIME={}", secs);
                    self.spec.lease.lease_time_seconds = secs;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for LEASEHOLD_LEASE_TIME: '{}'. Expected a positive number of seconds. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("LEASEHOLD_REAPER_ENABLED") {
            match parse_bool(&val) {
                Some(enabled) => {
                    tracing::info!("Environment override: LEASEHOLD_REAPER_ENABLED={}", enabled);
                    self.spec.lease.reaper_enabled = enabled;
                }
                None => {
                    tracing::warn!(
                        "Invalid value for LEASEHOLD_REAPER_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let lease = &self.spec.lease;
        if lease.lease_time_seconds == 0 {
            anyhow::bail!("spec.lease.lease_time_seconds must be positive");
        }

        if let Some(interval) = lease.reaper_interval_seconds {
            if interval == 0 {
                anyhow::bail!("spec.lease.reaper_interval_seconds must be positive");
            }
            if interval > lease.lease_time_seconds {
                anyhow::bail!(
                    "spec.lease.reaper_interval_seconds ({}) cannot exceed the lease time ({})",
                    interval,
                    lease.lease_time_seconds
                );
            }
        }

        if let Some(logging) = self.spec.observability.as_ref().and_then(|o| o.logging.as_ref()) {
            if logging.format != "json" && logging.format != "text" {
                anyhow::bail!("Unknown log format: '{}'. Expected 'json' or 'text'", logging.format);
            }
        }

        Ok(())
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = ServerConfigManifest::default();
        assert_eq!(manifest.api_version, "leasehold/v1");
        assert_eq!(manifest.kind, "ServerConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.lease.lease_time_seconds, 90);
        assert_eq!(manifest.spec.lease.effective_reaper_interval(), 22);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: leasehold/v1
kind: ServerConfig
metadata:
  name: nfs-head-1
spec:
  lease:
    lease_time_seconds: 4
"#;
        let manifest = ServerConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "nfs-head-1");
        assert_eq!(manifest.spec.lease.lease_time_seconds, 4);
        assert_eq!(manifest.spec.lease.effective_reaper_interval(), 1);
        assert!(manifest.spec.lease.reaper_enabled);
        assert!(manifest.spec.observability.is_none());
    }

    #[test]
    fn test_zero_reaper_interval_is_clamped() {
        let lease = LeaseConfig {
            lease_time_seconds: 90,
            reaper_interval_seconds: Some(0),
            reaper_enabled: true,
        };
        assert_eq!(lease.effective_reaper_interval(), 1);

        let short = LeaseConfig {
            lease_time_seconds: 0,
            reaper_interval_seconds: None,
            reaper_enabled: true,
        };
        assert_eq!(short.effective_reaper_interval(), 1);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leasehold-config.yaml");

        let mut manifest = ServerConfigManifest::default();
        manifest.spec.lease.reaper_interval_seconds = Some(10);
        manifest.spec.observability = Some(ObservabilityConfig {
            logging: Some(LoggingConfig {
                level: "debug".to_string(),
                format: "json".to_string(),
            }),
            metrics: Some(MetricsConfig {
                enabled: false,
                port: 9100,
            }),
        });
        manifest.to_yaml_file(&path).unwrap();

        let parsed = ServerConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(parsed.spec.lease.reaper_interval_seconds, Some(10));
        let observability = parsed.spec.observability.unwrap();
        assert_eq!(observability.logging.unwrap().format, "json");
        assert_eq!(observability.metrics.unwrap().port, 9100);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = ServerConfigManifest::load_or_default(Some(PathBuf::from(
            "/nonexistent/leasehold-config.yaml",
        )));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut manifest = ServerConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.metadata.name = "".to_string();
        assert!(manifest.validate().is_err());
        manifest.metadata.name = "head".to_string();

        manifest.spec.lease.lease_time_seconds = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.lease.lease_time_seconds = 90;

        manifest.spec.lease.reaper_interval_seconds = Some(0);
        assert!(manifest.validate().is_err());
        manifest.spec.lease.reaper_interval_seconds = Some(120);
        assert!(manifest.validate().is_err());
        manifest.spec.lease.reaper_interval_seconds = Some(30);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

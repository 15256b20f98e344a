//! Service configuration.

use std::path::Path;
use std::time::Duration;

use iot_client::IpFilter;
use iot_core::TrustedHostnames;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid CIDR in webhook IP filter: {0}")]
    InvalidCidr(#[from] ipnetwork::IpNetworkError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Timeout for each webhook request and for each detached lifecycle task.
    #[serde(default = "default_webhooks_timeout_seconds")]
    pub webhooks_timeout_seconds: u64,

    /// How long audit events are kept.
    #[serde(default = "default_event_exp_timeout_seconds")]
    pub event_exp_timeout_seconds: i64,

    /// Hostname patterns hub connection strings may point to.
    #[serde(default = "default_domain_whitelist")]
    pub domain_whitelist: Vec<String>,

    #[serde(default)]
    pub webhooks_ip_filter_whitelist_cidrs: Vec<String>,

    #[serde(default)]
    pub webhooks_ip_filter_blacklist_cidrs: Vec<String>,

    #[serde(default = "default_devauth_url")]
    pub devauth_url: String,

    #[serde(default = "default_workflows_url")]
    pub workflows_url: String,

    /// Devices per reconciliation batch.
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,
}

fn default_webhooks_timeout_seconds() -> u64 {
    10
}

fn default_event_exp_timeout_seconds() -> i64 {
    7 * 24 * 60 * 60 // one week
}

fn default_domain_whitelist() -> Vec<String> {
    vec![
        "*.azure-devices.net".to_string(),
        "*.iot.*.amazonaws.com".to_string(),
    ]
}

fn default_devauth_url() -> String {
    "http://mender-device-auth:8080".to_string()
}

fn default_workflows_url() -> String {
    "http://mender-workflows-server:8080".to_string()
}

fn default_sync_batch_size() -> usize {
    100
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn webhooks_timeout(&self) -> Duration {
        Duration::from_secs(self.webhooks_timeout_seconds)
    }

    pub fn event_expiration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.event_exp_timeout_seconds)
    }

    pub fn trusted_hostnames(&self) -> TrustedHostnames {
        TrustedHostnames::new(&self.domain_whitelist)
    }

    pub fn ip_filter(&self) -> Result<IpFilter, ConfigError> {
        let filter = IpFilter::parse(
            &self.webhooks_ip_filter_whitelist_cidrs,
            &self.webhooks_ip_filter_blacklist_cidrs,
        )?;
        Ok(filter)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhooks_timeout_seconds: default_webhooks_timeout_seconds(),
            event_exp_timeout_seconds: default_event_exp_timeout_seconds(),
            domain_whitelist: default_domain_whitelist(),
            webhooks_ip_filter_whitelist_cidrs: Vec::new(),
            webhooks_ip_filter_blacklist_cidrs: Vec::new(),
            devauth_url: default_devauth_url(),
            workflows_url: default_workflows_url(),
            sync_batch_size: default_sync_batch_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.webhooks_timeout(), Duration::from_secs(10));
        assert_eq!(config.event_expiration(), chrono::Duration::seconds(604800));
        assert!(config.trusted_hostnames().is_trusted("hub.azure-devices.net"));
        assert!(config.trusted_hostnames().is_trusted("x.iot.us-east-1.amazonaws.com"));
        assert_eq!(config.sync_batch_size, 100);
    }

    #[test]
    fn test_ip_filter_from_config() {
        let config = Config::from_toml(
            r#"
            webhooks_timeout_seconds = 3
            webhooks_ip_filter_whitelist_cidrs = ["10.0.0.0/8"]
            webhooks_ip_filter_blacklist_cidrs = ["8.8.8.0/24"]
            "#,
        )
        .unwrap();
        assert_eq!(config.webhooks_timeout(), Duration::from_secs(3));

        let filter = config.ip_filter().unwrap();
        assert!(filter.is_allowed("10.1.1.1".parse().unwrap()));
        assert!(!filter.is_allowed("8.8.8.8".parse().unwrap()));
        assert!(!filter.is_allowed("192.168.0.1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_cidr() {
        let config = Config::from_toml(r#"webhooks_ip_filter_blacklist_cidrs = ["10.0.0.0/99"]"#)
            .unwrap();
        assert!(matches!(config.ip_filter(), Err(ConfigError::InvalidCidr(_))));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Config::from_toml("webhooks_timeout_seconds = \"soon\""),
            Err(ConfigError::ParseError(_))
        ));
    }
}

//! Configuration for the discovery engine.
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a working configuration. Values can be loaded from YAML directly or
//! through the `config` crate, which layers `HUE_DISCOVERY__*` environment
//! variables on top of the file.

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Root configuration for bridge discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Worker threads of the discovery runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Timeout applied to every HTTP request (milliseconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,

    /// Path of the bridge config endpoint used for validation
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Cloud discovery settings
    #[serde(default)]
    pub nupnp: NupnpConfig,

    /// SSDP multicast settings
    #[serde(default)]
    pub upnp: UpnpConfig,

    /// mDNS browse settings
    #[serde(default)]
    pub mdns: MdnsConfig,

    /// Subnet scan settings
    #[serde(default)]
    pub ipscan: IpscanConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            http_timeout_ms: default_http_timeout(),
            config_path: default_config_path(),
            nupnp: NupnpConfig::default(),
            upnp: UpnpConfig::default(),
            mdns: MdnsConfig::default(),
            ipscan: IpscanConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| DiscoveryError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| DiscoveryError::Config {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Loads configuration with environment overrides (`HUE_DISCOVERY__*`).
    ///
    /// The file is optional; without it only defaults and environment
    /// variables apply.
    pub fn from_config_builder<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = config::Config::builder();
        let display = match &path {
            Some(p) => p.as_ref().display().to_string(),
            None => "<environment>".to_string(),
        };

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_ref()).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("HUE_DISCOVERY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DiscoveryError::Config {
                path: display.clone(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| DiscoveryError::Config {
            path: display,
            reason: e.to_string(),
        })
    }

    /// Returns the HTTP timeout as a Duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads cannot be 0"));
        }
        if self.http_timeout_ms == 0 {
            return Err(invalid("http_timeout_ms cannot be 0"));
        }
        if !self.config_path.starts_with('/') {
            return Err(invalid("config_path must start with '/'"));
        }
        if self.nupnp.url.trim().is_empty() {
            return Err(invalid("nupnp.url cannot be empty"));
        }
        if self.upnp.timeout_ms == 0 {
            return Err(invalid("upnp.timeout_ms cannot be 0"));
        }
        if self.upnp.send_count == 0 {
            return Err(invalid("upnp.send_count cannot be 0"));
        }
        if !self.upnp.multicast_addr.is_multicast() {
            return Err(invalid("upnp.multicast_addr must be a multicast address"));
        }
        if self.mdns.window_ms == 0 || self.mdns.poll_timeout_ms == 0 {
            return Err(invalid("mdns window and poll timeout cannot be 0"));
        }
        if self.mdns.poll_timeout_ms > self.mdns.window_ms {
            return Err(invalid("mdns.poll_timeout_ms cannot exceed mdns.window_ms"));
        }
        if self.mdns.service_types.is_empty() {
            return Err(invalid("at least one mdns service type must be configured"));
        }
        if self.ipscan.connect_timeout_ms == 0 {
            return Err(invalid("ipscan.connect_timeout_ms cannot be 0"));
        }
        if self.ipscan.max_concurrent == 0 {
            return Err(invalid("ipscan.max_concurrent cannot be 0"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> DiscoveryError {
    DiscoveryError::InvalidConfig(reason.to_string())
}

/// Cloud (NUPnP) discovery endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NupnpConfig {
    /// Discovery URL. Legacy meethue hosts get `/api/nupnp` appended.
    #[serde(default = "default_nupnp_url")]
    pub url: String,
}

impl Default for NupnpConfig {
    fn default() -> Self {
        Self {
            url: default_nupnp_url(),
        }
    }
}

/// SSDP multicast search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpnpConfig {
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: Ipv4Addr,

    #[serde(default = "default_ssdp_port")]
    pub port: u16,

    /// How long to listen for responses (milliseconds)
    #[serde(default = "default_upnp_timeout")]
    pub timeout_ms: u64,

    /// Number of M-SEARCH datagrams to send
    #[serde(default = "default_send_count")]
    pub send_count: u32,

    /// Gap between consecutive M-SEARCH datagrams (milliseconds)
    #[serde(default = "default_send_interval")]
    pub send_interval_ms: u64,

    /// MX header value (seconds)
    #[serde(default = "default_mx")]
    pub mx: u32,
}

impl Default for UpnpConfig {
    fn default() -> Self {
        Self {
            multicast_addr: default_multicast_addr(),
            port: default_ssdp_port(),
            timeout_ms: default_upnp_timeout(),
            send_count: default_send_count(),
            send_interval_ms: default_send_interval(),
            mx: default_mx(),
        }
    }
}

impl UpnpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

/// mDNS / DNS-SD browsing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// Collection window (milliseconds)
    #[serde(default = "default_mdns_window")]
    pub window_ms: u64,

    /// Upper bound of one poll of the responder (milliseconds)
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    /// Service types to browse
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            window_ms: default_mdns_window(),
            poll_timeout_ms: default_poll_timeout(),
            service_types: default_service_types(),
        }
    }
}

impl MdnsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Brute-force subnet scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpscanConfig {
    /// TCP port probed for reachability
    #[serde(default = "default_scan_port")]
    pub port: u16,

    /// Connect timeout per address (milliseconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum concurrent reachability probes
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for IpscanConfig {
    fn default() -> Self {
        Self {
            port: default_scan_port(),
            connect_timeout_ms: default_connect_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl IpscanConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// Default configuration values
fn default_worker_threads() -> usize {
    4
}

fn default_http_timeout() -> u64 {
    5000
}

fn default_config_path() -> String {
    "/api/config".to_string()
}

fn default_nupnp_url() -> String {
    "https://discovery.meethue.com".to_string()
}

fn default_multicast_addr() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 255, 250)
}

fn default_ssdp_port() -> u16 {
    1900
}

fn default_upnp_timeout() -> u64 {
    5000
}

fn default_send_count() -> u32 {
    2
}

fn default_send_interval() -> u64 {
    250
}

fn default_mx() -> u32 {
    3
}

fn default_mdns_window() -> u64 {
    8000
}

fn default_poll_timeout() -> u64 {
    1000
}

fn default_service_types() -> Vec<String> {
    vec!["_hue._tcp.local.".to_string(), "_hap._tcp.local.".to_string()]
}

fn default_scan_port() -> u16 {
    80
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mdns.window(), Duration::from_secs(8));
        assert_eq!(config.mdns.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.config_path, "/api/config");
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = DiscoveryConfig::from_yaml("").unwrap();
        assert_eq!(config.upnp.port, 1900);
        assert_eq!(config.ipscan.max_concurrent, 64);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r#"
nupnp:
  url: "http://www.meethue.com"
mdns:
  window_ms: 2000
  poll_timeout_ms: 250
"#;
        let config = DiscoveryConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.nupnp.url, "http://www.meethue.com");
        assert_eq!(config.mdns.window_ms, 2000);
        assert_eq!(config.mdns.service_types.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        assert!(DiscoveryConfig::from_yaml("upnp: [1, 2").is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = DiscoveryConfig::default();
        config.mdns.poll_timeout_ms = 9000;
        assert!(config.validate().is_err());

        let mut config = DiscoveryConfig::default();
        config.config_path = "api/config".to_string();
        assert!(config.validate().is_err());

        let mut config = DiscoveryConfig::default();
        config.upnp.multicast_addr = Ipv4Addr::new(192, 168, 1, 1);
        assert!(config.validate().is_err());

        let mut config = DiscoveryConfig::default();
        config.ipscan.max_concurrent = 0;
        assert!(config.validate().is_err());
    }
}

//! Configuration for the gateway
//!
//! Read once at startup from a JSON file. `${VAR}` references are
//! expanded from the environment before parsing so secrets can stay out
//! of the file.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub modes: ModesConfig,
    pub limits: LimitsConfig,
    pub webhooks: WebhooksConfig,
    pub logging: LoggingConfig,
}

/// Listener endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// SOCKS5 listener address
    pub listen: String,
    /// Transparent proxy listener for iptables REDIRECT (Linux only)
    pub transparent: Option<String>,
    /// Control API listener address
    pub api: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:1080".to_string(),
            transparent: None,
            api: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Per-mode settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModesConfig {
    pub direct: DirectConfig,
    pub warp: WarpConfig,
    pub home: HomeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Source IP for direct dials; bypasses a policy-routed tunnel
    pub local_ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    /// Tunnel interface name; mode is absent when the interface is not
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
    /// Upstream SOCKS5 host; mode is absent when unset
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 1080,
            username: None,
            password: None,
        }
    }
}

/// Traffic limits
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub home: HomeLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeLimitConfig {
    /// Byte cap for the home mode in MB; 0 means unlimited
    pub max_mb: u64,
    /// Mode to switch to when the cap is hit
    pub auto_switch_to: String,
}

impl Default for HomeLimitConfig {
    fn default() -> Self {
        Self {
            max_mb: 0,
            auto_switch_to: "direct".to_string(),
        }
    }
}

/// Webhook delivery settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    pub enabled: bool,
    pub url: String,
    pub secret: String,
    /// Identifier stamped into every event as its source
    pub source: String,
    pub events: EventsConfig,
}

/// Which events are delivered
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub mode_changed: bool,
    pub limit_reached: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let expanded = expand_env(json);
        serde_json::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Replace `${VAR}` references with environment values. Unset variables
/// expand to the empty string.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:1080");
        assert_eq!(config.limits.home.max_mb, 0);
        assert_eq!(config.limits.home.auto_switch_to, "direct");
        assert!(!config.webhooks.enabled);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_json(
            r#"{
                "server": {
                    "listen": "0.0.0.0:1080",
                    "transparent": "127.0.0.1:12345",
                    "api": "127.0.0.1:8080"
                },
                "modes": {
                    "direct": { "local_ip": "203.0.113.7" },
                    "warp": { "interface": "warp0" },
                    "home": {
                        "host": "198.51.100.2",
                        "port": 1081,
                        "username": "gate",
                        "password": "hunter2"
                    }
                },
                "limits": { "home": { "max_mb": 10240, "auto_switch_to": "warp" } },
                "webhooks": {
                    "enabled": true,
                    "url": "https://hooks.example.com/gate",
                    "secret": "s3cret",
                    "source": "vps-1",
                    "events": { "mode_changed": true, "limit_reached": true }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.server.transparent.as_deref(), Some("127.0.0.1:12345"));
        assert_eq!(config.modes.warp.interface.as_deref(), Some("warp0"));
        assert_eq!(config.modes.home.port, 1081);
        assert_eq!(config.limits.home.max_mb, 10240);
        assert_eq!(config.limits.home.auto_switch_to, "warp");
        assert!(config.webhooks.events.limit_reached);
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("SWITCH_GATE_TEST_SECRET", "from-env");
        let config = Config::from_json(
            r#"{ "webhooks": { "secret": "${SWITCH_GATE_TEST_SECRET}" } }"#,
        )
        .unwrap();
        assert_eq!(config.webhooks.secret, "from-env");
    }

    #[test]
    fn test_env_expansion_unset_is_empty() {
        let config = Config::from_json(
            r#"{ "webhooks": { "secret": "${SWITCH_GATE_TEST_UNSET}" } }"#,
        )
        .unwrap();
        assert_eq!(config.webhooks.secret, "");
    }
}

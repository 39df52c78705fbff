//! # config
//!
//! Gateway configuration.
//!
//! Values come from three layers, later layers winning:
//!   1. Built-in defaults (with environment overrides for network-facing values)
//!   2. Optional TOML file (`--config`, default `gateway.toml`)
//!   3. Command-line flags for port, group and identity file

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Multicast group shared by every node on the range (default 239.255.0.1)
    pub multicast_group: Ipv4Addr,
    /// UDP port for both listen and send (default 5555)
    pub udp_port: u16,
    /// Local interface used to join the group (default 0.0.0.0 = any)
    pub interface: Ipv4Addr,
    pub multicast_ttl: u32,
    /// Receive our own datagrams (needed when nodes share a host)
    pub multicast_loop: bool,
    pub recv_buffer_bytes: usize,
    /// Revision tag written into outbound envelopes
    pub protocol_revision: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: env_or("GATEWAY_MULTICAST_GROUP", Ipv4Addr::new(239, 255, 0, 1)),
            udp_port: env_or("GATEWAY_UDP_PORT", 5555),
            interface: env_or("GATEWAY_INTERFACE", Ipv4Addr::UNSPECIFIED),
            multicast_ttl: 1,
            multicast_loop: true,
            recv_buffer_bytes: 64 * 1024,
            protocol_revision: range_types::PROTOCOL_REVISION,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub store_path: PathBuf,
    /// Oldest history entries are dropped beyond this length
    pub history_limit: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            store_path: env_or("GATEWAY_IDENTITY_FILE", PathBuf::from("identity.json")),
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Speed stamped on waypoints when the target's speed is unknown, m/s
    pub fallback_speed_mps: f64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            fallback_speed_mps: env_or("GATEWAY_FALLBACK_SPEED_MPS", 5.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub stale_threshold_ms: u64,
    pub check_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: 5_000,
            check_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Source id the gateway announces itself with
    pub source_id: String,
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            source_id: "gateway".to_string(),
            interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Observer queue; notifications are dropped when full
    pub queue_capacity: usize,
    /// Outbound frame queue; frames are dropped when full
    pub outbound_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            outbound_capacity: 128,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub port: u16,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            port: env_or("GATEWAY_PANEL_PORT", 3001),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Configuration file the navigation application reads at launch
    pub config_path: PathBuf,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("navigation.json"),
        }
    }
}

// ── Full Config ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    pub identity: IdentityConfig,
    pub translation: TranslationConfig,
    pub liveness: LivenessConfig,
    pub heartbeat: HeartbeatConfig,
    pub notify: NotifyConfig,
    pub panel: PanelConfig,
    pub navigation: NavigationConfig,
}

impl GatewayConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No {} found, using default config", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid { field, reason: reason.to_string() }
        }

        if self.network.udp_port == 0 {
            return Err(invalid("network.udp_port", "must be non-zero"));
        }
        if !self.network.multicast_group.is_multicast() {
            return Err(invalid("network.multicast_group", "must be a multicast address"));
        }
        if self.network.recv_buffer_bytes < crate::codec::HEADER_LEN {
            return Err(invalid("network.recv_buffer_bytes", "must hold at least one envelope header"));
        }
        if self.panel.port == 0 {
            return Err(invalid("panel.port", "must be non-zero"));
        }
        let fallback = self.translation.fallback_speed_mps;
        if !fallback.is_finite() || fallback <= 0.0 {
            return Err(invalid("translation.fallback_speed_mps", "must be a positive number"));
        }
        if self.liveness.stale_threshold_ms == 0 || self.liveness.check_interval_ms == 0 {
            return Err(invalid("liveness", "threshold and interval must be non-zero"));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(invalid("heartbeat.interval_ms", "must be non-zero"));
        }
        if self.notify.queue_capacity == 0 || self.notify.outbound_capacity == 0 {
            return Err(invalid("notify", "queue capacities must be non-zero"));
        }
        if self.identity.history_limit == 0 {
            return Err(invalid("identity.history_limit", "must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_valid_defaults() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert_eq!(config.heartbeat.interval_ms, 1_000);
        assert_eq!(config.notify.queue_capacity, 256);
        assert_eq!(config.identity.history_limit, 100);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = GatewayConfig::from_toml(
            r#"
            [liveness]
            stale_threshold_ms = 2500

            [translation]
            fallback_speed_mps = 12.5
            "#,
        )
        .unwrap();
        assert_eq!(config.liveness.stale_threshold_ms, 2_500);
        assert_eq!(config.liveness.check_interval_ms, 1_000);
        assert_eq!(config.translation.fallback_speed_mps, 12.5);
    }

    #[test]
    fn test_network_section() {
        let config = GatewayConfig::from_toml(
            r#"
            [network]
            multicast_group = "239.1.2.3"
            udp_port = 6000
            "#,
        )
        .unwrap();
        assert_eq!(config.network.multicast_group, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(config.network.udp_port, 6000);
    }

    #[test]
    fn test_validate_rejects_non_multicast_group() {
        let mut config = GatewayConfig::default();
        config.network.multicast_group = Ipv4Addr::new(10, 0, 0, 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "network.multicast_group", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_fallback_speed() {
        let mut config = GatewayConfig::default();
        config.translation.fallback_speed_mps = f64::NAN;
        assert!(config.validate().is_err());
        config.translation.fallback_speed_mps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.panel.port, PanelConfig::default().port);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[network\nudp_port = ").unwrap();
        assert!(matches!(GatewayConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}

//! Relay configuration

use serde::{Deserialize, Serialize};

use vstation_common::BusConfig;

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// WebSocket listen address
    pub listen: String,

    /// Control bus configuration
    pub bus: BusConfig,

    /// Message limits
    pub limits: LimitsConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", vstation_common::DEFAULT_PORT),
            bus: BusConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Inbound message limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound WebSocket message size in bytes. Must leave room for
    /// a 128 MiB upload after base64 expansion.
    pub max_message_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 192 * 1024 * 1024,
        }
    }
}

impl RelayConfig {
    /// Load configuration from file, falling back to defaults if absent
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve the protocol.
    pub fn validate(&self) -> vstation_common::Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(vstation_common::Error::InvalidConfig(format!(
                "listen address {} is not host:port",
                self.listen
            )));
        }
        // A maximum-size upload grows by 4/3 in base64, plus envelope fields.
        let encoded_ceiling = (vstation_common::MAX_UPLOAD_BYTES + 2) / 3 * 4 + 4096;
        if (self.limits.max_message_bytes as u64) < encoded_ceiling {
            return Err(vstation_common::Error::InvalidConfig(format!(
                "max_message_bytes {} cannot carry a maximum-size upload (need at least {})",
                self.limits.max_message_bytes, encoded_ceiling
            )));
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path (port cache lives here)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// First port of the inclusive discovery scan range
    #[serde(default = "default_start_port")]
    pub start_port: u16,
    /// Last port of the inclusive discovery scan range
    #[serde(default = "default_end_port")]
    pub end_port: u16,
    /// Per-port health probe timeout in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Port used when discovery exhausts without a hit
    #[serde(default = "default_start_port")]
    pub default_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            start_port: default_start_port(),
            end_port: default_end_port(),
            probe_timeout_ms: default_probe_timeout(),
            default_port: default_start_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Delay between reconnection attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chromabridge")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_start_port() -> u16 {
    50000
}

fn default_end_port() -> u16 {
    50010
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_retry_delay() -> u64 {
    3000
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file or return defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    fn load_from(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> crate::Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, path: &std::path::Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;

        Ok(())
    }

    fn validate(&self) -> crate::Result<()> {
        if self.discovery.start_port > self.discovery.end_port {
            return Err(crate::Error::Config(format!(
                "discovery start_port {} is above end_port {}",
                self.discovery.start_port, self.discovery.end_port
            )));
        }
        Ok(())
    }

    /// Get the configuration file path
    /// Always uses ~/.config/chromabridge/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("chromabridge")
            .join("config.toml")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }

    /// Get the persisted port cache file path
    pub fn port_cache_path(&self) -> PathBuf {
        self.data_dir().join("bridge-port")
    }
}

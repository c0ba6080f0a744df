use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LISTENER_BIND_DEFAULT: &str = "127.0.0.1:7574";
const TELEMETRY_BIND_DEFAULT: &str = "127.0.0.1:7575";

/// Top-level configuration for the prism runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Address the proxy listener binds.
    #[serde(default = "default_listener_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Member id reported in handshake responses.
    #[serde(default = "default_member_id")]
    pub member_id: u32,
    /// Expected client heartbeat cadence; a connection silent for three
    /// intervals is closed.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Byte budget per legacy page before a new cookie is cut.
    #[serde(default = "default_transfer_threshold")]
    pub transfer_threshold: usize,
    /// Ceiling for a single wire frame.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Address of the management endpoint; absent disables it.
    #[serde(default = "default_telemetry_bind")]
    pub bind: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_listener_bind() -> String {
    LISTENER_BIND_DEFAULT.to_string()
}

fn default_member_id() -> u32 {
    1
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_transfer_threshold() -> usize {
    16 * 1024
}

fn default_max_frame_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_telemetry_bind() -> Option<String> {
    Some(TELEMETRY_BIND_DEFAULT.to_string())
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_listener_bind(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            member_id: default_member_id(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            transfer_threshold: default_transfer_threshold(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bind: default_telemetry_bind(),
            log_level: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            proxy: ProxyConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a path resolved via PRISM_CONFIG, defaulting
    /// to `config/prism.toml`. A missing default file yields the built-in
    /// configuration.
    pub fn load_from_env() -> Result<Self> {
        match std::env::var("PRISM_CONFIG") {
            Ok(path) => Self::load_from_path(Path::new(&path)),
            Err(_) => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from_path(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("config/prism.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.listener.bind.parse::<std::net::SocketAddr>().is_err() {
            bail!("listener.bind `{}` is not a socket address", self.listener.bind);
        }
        if let Some(bind) = &self.telemetry.bind {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                bail!("telemetry.bind `{bind}` is not a socket address");
            }
        }
        if self.proxy.heartbeat_interval_secs == 0 {
            bail!("proxy.heartbeat_interval_secs must be positive");
        }
        if self.proxy.transfer_threshold == 0 {
            bail!("proxy.transfer_threshold must be positive");
        }
        if self.proxy.max_frame_bytes < 1024 {
            bail!("proxy.max_frame_bytes must be at least 1024");
        }
        Ok(())
    }

    /// Idle deadline derived from the heartbeat cadence.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.heartbeat_interval_secs.saturating_mul(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parses_partial_documents() {
        let doc = r#"
            [proxy]
            transfer_threshold = 128
        "#;
        let config: Config = toml::from_str(doc).unwrap();
        assert_eq!(config.proxy.transfer_threshold, 128);
        assert_eq!(config.listener.bind, LISTENER_BIND_DEFAULT);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_bind() {
        let doc = r#"
            [listener]
            bind = "not-an-address"
        "#;
        let config: Config = toml::from_str(doc).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let doc = r#"
            [proxy]
            heartbeat_interval_secs = 0
        "#;
        let config: Config = toml::from_str(doc).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prism.toml");
        fs::write(&path, "[proxy]\nmember_id = 7\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.proxy.member_id, 7);
    }
}

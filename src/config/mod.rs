//! Configuration management
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `CALLWIRE__SECTION__KEY` environment variables.

use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    pub signaling: SignalingConfig,
    pub call: CallConfig,
    pub reconnect: ReconnectConfig,
    pub ice: IceConfig,
}

/// Relay server bind settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Frames queued per room member before publishers wait
    pub member_queue: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub url: String,
}

/// Call deadlines and buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    pub offer_timeout_secs: u64,
    pub incoming_timeout_secs: u64,
    /// Media chunks held while a call is not yet connected
    pub chunk_buffer: usize,
}

impl CallConfig {
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_secs)
    }

    pub fn incoming_timeout(&self) -> Duration {
        Duration::from_secs(self.incoming_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceConfig {
    pub servers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                member_queue: 64,
            },
            signaling: SignalingConfig {
                url: "ws://127.0.0.1:8080/signaling/lobby".to_string(),
            },
            call: CallConfig {
                offer_timeout_secs: 30,
                incoming_timeout_secs: 30,
                chunk_buffer: 32,
            },
            reconnect: ReconnectConfig {
                initial_delay_ms: 500,
                max_delay_ms: 30_000,
                multiplier: 2.0,
                jitter: 0.2,
            },
            ice: IceConfig {
                servers: vec![
                    "stun:stun1.l.google.com:19302".to_string(),
                    "stun:stun2.l.google.com:19302".to_string(),
                ],
            },
        }
    }
}

impl Config {
    /// Load configuration from `path` (extension optional) and the environment
    pub fn load(path: &str) -> Result<Self> {
        debug!("Loading configuration from {}", path);
        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Config::default())?)
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("CALLWIRE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("ice.servers"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.relay.host, self.relay.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.call.offer_timeout(), Duration::from_secs(30));
        assert_eq!(config.call.incoming_timeout(), Duration::from_secs(30));
        assert_eq!(config.ice.servers.len(), 2);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/callwire-test").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("callwire-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[call]\noffer_timeout_secs = 5\nincoming_timeout_secs = 7\nchunk_buffer = 4\n\n[relay]\nport = 9100"
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.call.offer_timeout_secs, 5);
        assert_eq!(config.call.incoming_timeout_secs, 7);
        assert_eq!(config.call.chunk_buffer, 4);
        assert_eq!(config.relay.port, 9100);
        assert_eq!(config.relay.host, "0.0.0.0");

        std::fs::remove_file(path).unwrap();
    }
}

//! Configuration management

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Network configuration
    pub network: NetworkConfig,

    /// Relay session configuration
    pub session: SessionConfig,

    /// Capture source configuration
    pub capture: CaptureConfig,

    /// Playback sink configuration
    pub playback: PlaybackConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local bind address (server)
    pub bind_address: String,

    /// TCP port for the relay server
    pub port: u16,

    /// Relay server address (client)
    pub server_address: String,

    /// Socket send buffer size
    pub send_buffer_size: usize,

    /// Socket receive buffer size
    pub recv_buffer_size: usize,

    /// Enable SO_REUSEADDR
    pub reuse_addr: bool,

    /// Disable Nagle on relay streams
    pub nodelay: bool,

    /// Outbound messages queued per connection before sends start failing
    pub outbound_queue: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_TCP_PORT,
            server_address: format!("127.0.0.1:{}", DEFAULT_TCP_PORT),
            send_buffer_size: 256 * 1024,
            recv_buffer_size: 256 * 1024,
            reuse_addr: true,
            nodelay: true,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl NetworkConfig {
    /// Address the server listens on
    pub fn bind_socket_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| crate::Error::Config(e.to_string()))
    }

    /// Address the client connects to
    pub fn server_socket_addr(&self) -> crate::Result<SocketAddr> {
        self.server_address
            .parse()
            .map_err(|e: std::net::AddrParseError| crate::Error::Config(e.to_string()))
    }
}

/// Relay session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Re-send RequestProxy if no assignment arrives within this time
    pub request_timeout_ms: u64,

    /// Maximum simultaneous remote connections
    pub max_connections: usize,

    /// Run an in-process host participant next to the server
    pub host_participant: bool,

    /// Interval between stats log lines
    pub stats_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_connections: 64,
            host_participant: false,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

/// Synthetic capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Produce frames at all
    pub enabled: bool,

    /// Time between frames
    pub frame_interval_ms: u64,

    /// Bytes per frame
    pub frame_bytes: usize,

    /// Frames buffered between the capture thread and the sender
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            frame_bytes: DEFAULT_FRAME_BYTES,
            queue_capacity: DEFAULT_CAPTURE_QUEUE,
        }
    }
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Capture channel capacity, never zero
    pub fn queue_depth(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

/// Playback sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Frames buffered between dispatch and the playback consumer
    pub queue_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_PLAYBACK_QUEUE,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else defaults
    pub fn load_or_default(path: Option<&PathBuf>) -> crate::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "voice-relay", "voice-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.network.port = 9100;
        config.session.host_participant = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.network.port, 9100);
        assert!(loaded.session.host_participant);
        assert_eq!(loaded.capture.frame_bytes, DEFAULT_FRAME_BYTES);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str("[session]\nrequest_timeout_ms = 50\n").unwrap();
        assert_eq!(config.session.request_timeout(), Duration::from_millis(50));
        assert_eq!(config.network.port, DEFAULT_TCP_PORT);
    }

    #[test]
    fn test_zero_capture_queue_is_clamped() {
        let config: AppConfig =
            toml::from_str("[capture]\nqueue_capacity = 0\n[playback]\nqueue_capacity = 0\n").unwrap();
        assert_eq!(config.capture.queue_depth(), 1);
        assert_eq!(config.playback.queue_capacity, 0);

        let defaults = CaptureConfig::default();
        assert_eq!(defaults.queue_depth(), DEFAULT_CAPTURE_QUEUE);
    }

    #[test]
    fn test_bad_address_is_config_error() {
        let mut config = NetworkConfig::default();
        config.server_address = "not an address".to_string();
        assert!(matches!(
            config.server_socket_addr(),
            Err(crate::Error::Config(_))
        ));
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::messages::MAX_WRAPPER_OVERHEAD;
use crate::types::PeerId;
use crate::util::errors::{ChatError, Result};

/// Largest frame (line or datagram) accepted by default, in bytes
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the rendezvous server listens on
    pub listen_addr: String,

    /// Number of identity slots in the membership directory
    pub max_peers: usize,

    /// Maximum accepted line length
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6000".to_string(),
            max_peers: 256,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_peers == 0 {
            return Err(ChatError::InvalidConfig(
                "max_peers must be at least 1".to_string(),
            ));
        }

        if self.max_peers > PeerId::MAX as usize + 1 {
            return Err(ChatError::InvalidConfig(format!(
                "max_peers cannot exceed {}",
                PeerId::MAX as usize + 1
            )));
        }

        if self.max_frame_len == 0 {
            return Err(ChatError::InvalidConfig(
                "max_frame_len cannot be zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Address of the rendezvous server
    pub server_addr: String,

    /// Host every peer binds its datagram socket on
    pub host: IpAddr,

    /// Peer `n` listens for datagrams on `port_base + n`
    pub port_base: u16,

    /// Directory holding the `<port>.txt` log snapshot
    pub data_dir: PathBuf,

    /// Maximum accepted frame length
    pub max_frame_len: usize,

    /// Abort an edit round when votes are still missing after this long.
    /// `None` waits forever.
    pub vote_timeout_ms: Option<u64>,

    /// Request a fresh membership snapshot automatically before chatting or editing
    pub auto_refresh: bool,

    /// How long to wait for the server to answer an automatic refresh
    pub refresh_timeout_ms: u64,

    /// Number of recently received payloads remembered for duplicate
    /// suppression; 0 turns suppression off
    pub dedup_window: usize,

    /// Reload the log snapshot from disk at startup
    pub resume_log: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6000".to_string(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_base: 9000,
            data_dir: PathBuf::from("."),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            vote_timeout_ms: None,
            auto_refresh: true,
            refresh_timeout_ms: 2000,
            dedup_window: 1,
            resume_log: false,
        }
    }
}

impl PeerConfig {
    pub fn vote_timeout(&self) -> Option<Duration> {
        self.vote_timeout_ms.map(Duration::from_millis)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_len <= MAX_WRAPPER_OVERHEAD {
            return Err(ChatError::InvalidConfig(format!(
                "max_frame_len must exceed {} bytes to carry any payload",
                MAX_WRAPPER_OVERHEAD
            )));
        }

        if self.vote_timeout_ms == Some(0) {
            return Err(ChatError::InvalidConfig(
                "vote_timeout_ms must be positive when set".to_string(),
            ));
        }

        // Peers address each other at this host, so it must be routable
        if self.host.is_unspecified() {
            return Err(ChatError::InvalidConfig(
                "host must be a concrete address, not a wildcard".to_string(),
            ));
        }

        if self.server_addr.is_empty() {
            return Err(ChatError::InvalidConfig(
                "server_addr cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub peer: PeerConfig,
}

impl Config {
    /// Load configuration from a TOML file. Missing sections fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ChatError::InvalidConfig(format!("Failed to read config file: {}", e))
        })?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).map_err(|e| {
            ChatError::InvalidConfig(format!("Failed to parse config file: {}", e))
        })?;

        config.server.validate()?;
        config.peer.validate()?;

        Ok(config)
    }
}

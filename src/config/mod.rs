pub mod config;

pub use config::{Config, PeerConfig, ServerConfig, DEFAULT_MAX_FRAME_LEN};

pub mod commands;
pub mod console;

pub use commands::{parse_command, PeerCommand};

pub mod client;
pub mod config;
pub mod db;
pub mod membership;
pub mod multicast;
pub mod network;
pub mod observer;
pub mod peer;
pub mod server;
pub mod storage;
pub mod types;
pub mod util;
pub mod vote;

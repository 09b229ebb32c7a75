pub mod events;
pub mod node;

pub use events::PeerEvent;
pub use node::Peer;

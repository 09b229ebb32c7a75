pub mod codec;
pub mod messages;
pub mod peer_registry;
pub mod server_link;
pub mod transport;

pub use messages::{PeerFrame, ServerNotice, ServerRequest};
pub use peer_registry::PeerRegistry;
pub use server_link::{ServerLines, ServerLink, TcpServerLink};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};

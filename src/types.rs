use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use crate::util::errors::{ChatError, Result};

/// Peer identifier, unique among currently active peers
pub type PeerId = u16;

/// Type alias for log indices (0-based)
pub type LogIndex = usize;

/// Identifier of a vote round, local to the proposing peer
pub type RoundId = u64;

/// A single entry in the replicated log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// The index of this entry in the log
    pub index: LogIndex,
    /// The text payload
    pub payload: String,
}

impl LogEntry {
    pub fn new(index: LogIndex, payload: impl Into<String>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }
}

/// Datagram address of a peer. Always derived from a `PeerId`, never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerEndpoint(SocketAddr);

impl PeerEndpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// `host:(port_base + id)`
    pub fn derive(host: IpAddr, port_base: u16, id: PeerId) -> Result<Self> {
        let port = port_base.checked_add(id).ok_or_else(|| {
            ChatError::InvalidConfig(format!(
                "peer {} does not fit above port base {}",
                id, port_base
            ))
        })?;
        Ok(Self(SocketAddr::new(host, port)))
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for PeerEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

/// Active peers in slot order, as handed out by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipList(pub Vec<PeerId>);

const PEERS_PREFIX: &str = "Peers:";

impl MembershipList {
    pub fn ids(&self) -> &[PeerId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `Peers: 0 1 2` line. Returns `None` when the line is not a listing.
    pub fn parse(line: &str) -> Option<Result<Self>> {
        let rest = line.trim().strip_prefix(PEERS_PREFIX)?;
        let ids = rest
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<PeerId>()
                    .map_err(|_| ChatError::MalformedFrame(format!("bad peer id {:?}", token)))
            })
            .collect::<Result<Vec<_>>>();
        Some(ids.map(MembershipList))
    }
}

impl std::fmt::Display for MembershipList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", PEERS_PREFIX)?;
        for id in &self.0 {
            write!(f, " {}", id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_membership_round_trip() {
        let list = MembershipList(vec![0, 1, 2]);
        assert_eq!(list.to_string(), "Peers: 0 1 2");
        assert_eq!(MembershipList::parse("Peers: 0 1 2").unwrap().unwrap(), list);
        assert_eq!(
            MembershipList::parse("Peers:").unwrap().unwrap(),
            MembershipList::default()
        );
        assert!(MembershipList::parse("Welcome").is_none());
        assert!(MembershipList::parse("Peers: 0 x").unwrap().is_err());
    }

    #[test]
    fn test_endpoint_derivation() {
        let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let endpoint = PeerEndpoint::derive(host, 9000, 3).unwrap();
        assert_eq!(endpoint.port(), 9003);
        assert!(PeerEndpoint::derive(host, u16::MAX, 1).is_err());
    }
}

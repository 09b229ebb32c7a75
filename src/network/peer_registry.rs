use std::collections::HashMap;
use std::net::IpAddr;

use crate::types::{MembershipList, PeerEndpoint, PeerId};
use crate::util::errors::Result;

/// Maps between peer ids and their datagram endpoints, rebuilt from every
/// membership snapshot the server hands out.
///
/// Each snapshot may be consumed by at most one chat or edit action; after
/// that the registry is stale until a newer snapshot arrives.
pub struct PeerRegistry {
    host: IpAddr,
    port_base: u16,
    id_to_endpoint: HashMap<PeerId, PeerEndpoint>,
    endpoint_to_id: HashMap<PeerEndpoint, PeerId>,
    members: Vec<PeerId>,
    snapshot_seq: u64,
    consumed_seq: u64,
}

impl PeerRegistry {
    pub fn new(host: IpAddr, port_base: u16) -> Self {
        Self {
            host,
            port_base,
            id_to_endpoint: HashMap::new(),
            endpoint_to_id: HashMap::new(),
            members: Vec::new(),
            snapshot_seq: 0,
            consumed_seq: 0,
        }
    }

    /// Replace the mappings with a new snapshot. Returns its sequence number.
    pub fn apply_snapshot(&mut self, list: &MembershipList) -> Result<u64> {
        let mut id_to_endpoint = HashMap::with_capacity(list.len());
        let mut endpoint_to_id = HashMap::with_capacity(list.len());

        for &id in list.ids() {
            let endpoint = PeerEndpoint::derive(self.host, self.port_base, id)?;
            id_to_endpoint.insert(id, endpoint);
            endpoint_to_id.insert(endpoint, id);
        }

        self.id_to_endpoint = id_to_endpoint;
        self.endpoint_to_id = endpoint_to_id;
        self.members = list.ids().to_vec();
        self.snapshot_seq += 1;

        tracing::debug!("Applied membership snapshot {}: {}", self.snapshot_seq, list);
        Ok(self.snapshot_seq)
    }

    /// Consume the current snapshot for one action. Returns every member
    /// except `self_id`, or `None` if the snapshot was already used.
    pub fn take_fresh(&mut self, self_id: PeerId) -> Option<Vec<(PeerId, PeerEndpoint)>> {
        if self.snapshot_seq <= self.consumed_seq {
            return None;
        }
        self.consumed_seq = self.snapshot_seq;

        Some(
            self.members
                .iter()
                .filter(|id| **id != self_id)
                .filter_map(|id| self.id_to_endpoint.get(id).map(|ep| (*id, *ep)))
                .collect(),
        )
    }

    pub fn is_fresh(&self) -> bool {
        self.snapshot_seq > self.consumed_seq
    }

    pub fn snapshot_seq(&self) -> u64 {
        self.snapshot_seq
    }

    /// Get PeerId from the source endpoint of a datagram
    pub fn peer_at(&self, endpoint: &PeerEndpoint) -> Option<PeerId> {
        self.endpoint_to_id.get(endpoint).copied()
    }

    pub fn endpoint_of(&self, id: PeerId) -> Option<PeerEndpoint> {
        self.id_to_endpoint.get(&id).copied()
    }

    /// Members of the last snapshot, in slot order
    pub fn members(&self) -> &[PeerId] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    #[test]
    fn test_snapshot_derives_endpoints() {
        let mut registry = registry();
        registry.apply_snapshot(&MembershipList(vec![0, 2])).unwrap();

        let endpoint = registry.endpoint_of(2).unwrap();
        assert_eq!(endpoint.port(), 9002);
        assert_eq!(registry.peer_at(&endpoint), Some(2));
        assert_eq!(registry.endpoint_of(1), None);
    }

    #[test]
    fn test_snapshot_is_consumed_once() {
        let mut registry = registry();
        assert!(registry.take_fresh(0).is_none());

        registry.apply_snapshot(&MembershipList(vec![0, 1, 2])).unwrap();
        let targets = registry.take_fresh(0).unwrap();
        assert_eq!(
            targets.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(!registry.is_fresh());
        assert!(registry.take_fresh(0).is_none());

        registry.apply_snapshot(&MembershipList(vec![0, 1])).unwrap();
        assert_eq!(registry.take_fresh(0).unwrap().len(), 1);
    }

    #[test]
    fn test_new_snapshot_replaces_mappings() {
        let mut registry = registry();
        registry.apply_snapshot(&MembershipList(vec![0, 1])).unwrap();
        let stale = registry.endpoint_of(1).unwrap();

        registry.apply_snapshot(&MembershipList(vec![0])).unwrap();
        assert_eq!(registry.peer_at(&stale), None);
        assert_eq!(registry.members(), &[0]);
        assert_eq!(registry.snapshot_seq(), 2);
    }
}

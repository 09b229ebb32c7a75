use crate::types::{MembershipList, PeerId};
use crate::util::errors::{ChatError, Result};

/// Server-side slot table of connected peers. A peer's id is its slot.
#[derive(Debug)]
pub struct Directory {
    slots: Vec<Option<String>>,
    capacity: usize,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Take the first free slot.
    pub fn register(&mut self) -> Result<PeerId> {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(ChatError::DirectoryFull(self.capacity)),
        };

        let id = PeerId::try_from(slot)
            .map_err(|_| ChatError::DirectoryFull(self.capacity))?;
        self.slots[slot] = Some(id.to_string());

        tracing::info!("Peer {} registered", id);
        Ok(id)
    }

    pub fn deregister(&mut self, id: PeerId) {
        let removed = self
            .slots
            .get_mut(id as usize)
            .and_then(|slot| slot.take())
            .is_some();

        if removed {
            tracing::info!("Peer {} deregistered", id);
        } else {
            tracing::debug!("Peer {} was not registered", id);
        }
    }

    pub fn display_name(&self, id: PeerId) -> Option<&str> {
        self.slots.get(id as usize).and_then(|slot| slot.as_deref())
    }

    /// Active peers in slot order
    pub fn snapshot(&self) -> MembershipList {
        MembershipList(
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_some())
                .filter_map(|(slot, _)| PeerId::try_from(slot).ok())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

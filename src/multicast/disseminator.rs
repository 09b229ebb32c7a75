use std::sync::Arc;
use tokio::sync::Mutex;

use crate::network::codec::check_frame_len;
use crate::network::{PeerFrame, Transport};
use crate::types::{PeerEndpoint, PeerId};
use crate::util::errors::Result;
use crate::vote::Vote;

/// Best-effort broadcast over the datagram transport. Sends from one process
/// never interleave: every broadcast and vote reply holds the same lock.
pub struct Multicast {
    transport: Arc<dyn Transport>,
    lock: Mutex<()>,
    max_frame_len: usize,
}

impl Multicast {
    pub fn new(transport: Arc<dyn Transport>, max_frame_len: usize) -> Self {
        Self {
            transport,
            lock: Mutex::new(()),
            max_frame_len,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send `frame` once to each target. Failed sends are logged and skipped.
    /// Returns how many copies went out.
    pub async fn disseminate(
        &self,
        targets: &[(PeerId, PeerEndpoint)],
        frame: &PeerFrame,
    ) -> Result<usize> {
        let text = frame.encode();
        check_frame_len(&text, self.max_frame_len)?;

        let _guard = self.lock.lock().await;
        let mut delivered = 0;

        for (id, endpoint) in targets {
            match self.transport.send_to(*endpoint, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Failed to send to peer {} at {}: {}", id, endpoint, e),
            }
        }

        tracing::debug!("Disseminated {:?} to {}/{} peers", text, delivered, targets.len());
        Ok(delivered)
    }

    /// Reply to a vote request, point-to-point.
    pub async fn send_vote(&self, to: PeerEndpoint, vote: Vote) -> Result<()> {
        let text = PeerFrame::Vote(vote).encode();
        let _guard = self.lock.lock().await;
        self.transport.send_to(to, &text).await
    }
}

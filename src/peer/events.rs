use crate::types::{LogIndex, MembershipList, PeerId, RoundId};

/// Things the operator of a peer should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Membership(MembershipList),
    ChatReceived {
        from: Option<PeerId>,
        index: LogIndex,
        payload: String,
    },
    VoteRequested {
        proposer: PeerId,
        round: RoundId,
        index: LogIndex,
        payload: String,
    },
    /// A committed edit from another peer was applied locally
    EditApplied { index: LogIndex, payload: String },
    EditCommitted {
        round: RoundId,
        index: LogIndex,
        payload: String,
    },
    EditAborted {
        round: RoundId,
        index: LogIndex,
        by: PeerId,
    },
    EditTimedOut {
        round: RoundId,
        index: LogIndex,
        missing: Vec<PeerId>,
    },
    ServerText(String),
    Disconnected,
}

impl std::fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::Membership(list) => write!(f, "{}", list),
            PeerEvent::ChatReceived {
                from: Some(from),
                index,
                payload,
            } => write!(f, "[{}] peer {}: {}", index, from, payload),
            PeerEvent::ChatReceived {
                from: None,
                index,
                payload,
            } => write!(f, "[{}] {}", index, payload),
            PeerEvent::VoteRequested {
                proposer,
                index,
                payload,
                ..
            } => write!(
                f,
                "Peer {} wants to change entry {} to {:?}. Type /GO to approve, /ABORT to reject",
                proposer, index, payload
            ),
            PeerEvent::EditApplied { index, payload } => {
                write!(f, "Entry {} is now {:?}", index, payload)
            }
            PeerEvent::EditCommitted { index, payload, .. } => {
                write!(f, "Your edit was approved: entry {} is now {:?}", index, payload)
            }
            PeerEvent::EditAborted { index, by, .. } => {
                write!(f, "Your edit of entry {} was aborted by peer {}", index, by)
            }
            PeerEvent::EditTimedOut { index, missing, .. } => write!(
                f,
                "Your edit of entry {} timed out waiting for peers {:?}",
                index, missing
            ),
            PeerEvent::ServerText(text) => write!(f, "{}", text),
            PeerEvent::Disconnected => write!(f, "You have been disconnected"),
        }
    }
}

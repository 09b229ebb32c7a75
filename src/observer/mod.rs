//! Server-side record of every state change peers report, used to spot
//! changes that happened within the same timestamp granularity.
//!
//! Timestamps are whole seconds and no logical clock is involved, so a
//! detected conflict only says "these two could have happened in either
//! order"; the earlier arrival is named first by convention.

use crate::types::LogIndex;
use crate::util::errors::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    Chat,
    Edit,
}

impl ObservationKind {
    /// Command word used on the peer/server channel
    pub fn command(&self) -> &'static str {
        match self {
            ObservationKind::Chat => "/msg",
            ObservationKind::Edit => "/edit",
        }
    }
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationKind::Chat => write!(f, "chat"),
            ObservationKind::Edit => write!(f, "edit"),
        }
    }
}

/// A state change as reported by one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationRecord {
    pub payload: String,
    /// Seconds since the Unix epoch, taken by the reporting peer
    pub timestamp: u64,
    pub index: LogIndex,
}

impl ObservationRecord {
    pub fn new(payload: impl Into<String>, timestamp: u64, index: LogIndex) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
            index,
        }
    }

    /// Parse `payload | timestamp | index`. The payload may itself contain `|`.
    pub fn parse(body: &str) -> Result<Self> {
        let mut fields = body.rsplitn(3, '|');
        let index = fields.next().map(str::trim);
        let timestamp = fields.next().map(str::trim);
        let payload = fields.next().map(str::trim);

        let (payload, timestamp, index) = match (payload, timestamp, index) {
            (Some(p), Some(t), Some(i)) if !p.is_empty() => (p, t, i),
            _ => {
                return Err(ChatError::MalformedFrame(format!(
                    "expected 'payload | timestamp | index', got {:?}",
                    body
                )))
            }
        };

        let timestamp = timestamp
            .parse()
            .map_err(|_| ChatError::MalformedFrame(format!("bad timestamp {:?}", timestamp)))?;
        let index = index
            .parse()
            .map_err(|_| ChatError::MalformedFrame(format!("bad index {:?}", index)))?;

        Ok(Self::new(payload, timestamp, index))
    }

    pub fn encode(&self) -> String {
        format!("{} | {} | {}", self.payload, self.timestamp, self.index)
    }
}

/// Two consecutive same-kind records that share a timestamp but not a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ObservationKind,
    /// Arrived first, designated as logically first
    pub first: ObservationRecord,
    pub second: ObservationRecord,
}

impl Conflict {
    pub fn same_index(&self) -> bool {
        self.first.index == self.second.index
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} goes first and {:?} goes second",
            self.first.payload, self.second.payload
        )
    }
}

/// Append-only chat and edit observation sequences
#[derive(Debug, Default)]
pub struct Observer {
    chats: Vec<ObservationRecord>,
    edits: Vec<ObservationRecord>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report and compare it with the previous one of the same kind.
    pub fn observe(&mut self, kind: ObservationKind, record: ObservationRecord) -> Option<Conflict> {
        tracing::info!(
            "{} observed: {:?} with TS: {} and key: {}",
            kind,
            record.payload,
            record.timestamp,
            record.index
        );

        let sequence = self.sequence_mut(kind);
        let conflict = sequence.last().and_then(|previous| {
            if previous.timestamp == record.timestamp && previous.payload != record.payload {
                Some(Conflict {
                    kind,
                    first: previous.clone(),
                    second: record.clone(),
                })
            } else {
                None
            }
        });
        sequence.push(record);

        if let Some(conflict) = &conflict {
            tracing::warn!(
                "Concurrent {} reports (same index: {}): {}",
                kind,
                conflict.same_index(),
                conflict
            );
        }

        conflict
    }

    pub fn records(&self, kind: ObservationKind) -> &[ObservationRecord] {
        match kind {
            ObservationKind::Chat => &self.chats,
            ObservationKind::Edit => &self.edits,
        }
    }

    fn sequence_mut(&mut self, kind: ObservationKind) -> &mut Vec<ObservationRecord> {
        match kind {
            ObservationKind::Chat => &mut self.chats,
            ObservationKind::Edit => &mut self.edits,
        }
    }
}

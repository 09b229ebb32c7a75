//! Text frames exchanged between peers (datagrams) and between a peer and
//! the server (lines).

use crate::observer::{ObservationKind, ObservationRecord};
use crate::types::{LogIndex, MembershipList, PeerId, RoundId};
use crate::util::errors::{ChatError, Result};
use crate::vote::Vote;

pub const APPROVE_TOKEN: &str = "/GO";
pub const ABORT_TOKEN: &str = "/ABORT";

const EDIT_REQUEST_MARKER: &str = " ~edit-request ";
const OVERWRITE_MARKER: &str = " ~overwrite ";

/// Widest decimal rendering of an index, id, round or timestamp
const MAX_NUMBER_WIDTH: usize = 20;

/// Bytes added to a payload by the widest wrapper it travels in: a vote
/// request (marker plus index, proposer and round) or an observation line
/// (`/edit ` plus ` | <ts> | <index>`).
pub const MAX_WRAPPER_OVERHEAD: usize = {
    let vote_request = EDIT_REQUEST_MARKER.len() + 3 * MAX_NUMBER_WIDTH + 2;
    let observation = "/edit ".len() + 2 * (" | ".len() + MAX_NUMBER_WIDTH);
    if vote_request > observation {
        vote_request
    } else {
        observation
    }
};

/// Longest payload that fits in every frame built around it.
pub fn max_payload_len(max_frame_len: usize) -> usize {
    max_frame_len.saturating_sub(MAX_WRAPPER_OVERHEAD)
}

/// Peer-to-peer datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// Plain chat message, appended by every receiver
    Chat(String),
    /// Request to vote on overwriting `index` with `payload`
    VoteRequest {
        proposer: PeerId,
        round: RoundId,
        index: LogIndex,
        payload: String,
    },
    /// Reply to a vote request, sent only to the proposer
    Vote(Vote),
    /// Committed edit, applied unconditionally by every receiver
    Overwrite { index: LogIndex, payload: String },
}

impl PeerFrame {
    pub fn encode(&self) -> String {
        match self {
            PeerFrame::Chat(payload) => payload.clone(),
            PeerFrame::VoteRequest {
                proposer,
                round,
                index,
                payload,
            } => format!(
                "{}{}{} {} {}",
                payload, EDIT_REQUEST_MARKER, index, proposer, round
            ),
            PeerFrame::Vote(Vote::Approve) => APPROVE_TOKEN.to_string(),
            PeerFrame::Vote(Vote::Abort) => ABORT_TOKEN.to_string(),
            PeerFrame::Overwrite { index, payload } => {
                format!("{}{}{}", payload, OVERWRITE_MARKER, index)
            }
        }
    }

    pub fn decode(text: &str) -> Result<Self> {
        let text = text.trim_end_matches(|c| c == '\r' || c == '\n');

        if text == APPROVE_TOKEN {
            return Ok(PeerFrame::Vote(Vote::Approve));
        }
        if text == ABORT_TOKEN {
            return Ok(PeerFrame::Vote(Vote::Abort));
        }

        if let Some((payload, tail)) = text.rsplit_once(EDIT_REQUEST_MARKER) {
            let mut fields = tail.split_whitespace();
            let index = parse_field(fields.next(), "index")?;
            let proposer = parse_field(fields.next(), "proposer")?;
            let round = parse_field(fields.next(), "round")?;
            if fields.next().is_some() {
                return Err(ChatError::MalformedFrame(format!(
                    "trailing fields in edit request {:?}",
                    tail
                )));
            }
            check_received(payload)?;
            return Ok(PeerFrame::VoteRequest {
                proposer,
                round,
                index,
                payload: payload.to_string(),
            });
        }

        if let Some((payload, tail)) = text.rsplit_once(OVERWRITE_MARKER) {
            let index = parse_field(Some(tail.trim()), "index")?;
            check_received(payload)?;
            return Ok(PeerFrame::Overwrite {
                index,
                payload: payload.to_string(),
            });
        }

        check_received(text)?;
        Ok(PeerFrame::Chat(text.to_string()))
    }

    /// Votes are never subject to duplicate suppression: identical tokens
    /// from different voters are distinct votes.
    pub fn is_vote(&self) -> bool {
        matches!(self, PeerFrame::Vote(_))
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, name: &str) -> Result<T> {
    let field =
        field.ok_or_else(|| ChatError::MalformedFrame(format!("missing {} field", name)))?;
    field
        .parse()
        .map_err(|_| ChatError::MalformedFrame(format!("bad {} field {:?}", name, field)))
}

/// Received payloads obey the same rules as outgoing ones; anything else
/// would not survive a persist/reload cycle.
fn check_received(payload: &str) -> Result<()> {
    check_payload_text(payload).map_err(|e| match e {
        ChatError::InvalidPayload(reason) => ChatError::MalformedFrame(reason),
        other => other,
    })
}

/// Reject payloads that could not be carried by the line/datagram formats,
/// before anything is sent or stored.
pub fn validate_payload(payload: &str, max_frame_len: usize) -> Result<()> {
    check_payload_text(payload)?;

    let max = max_payload_len(max_frame_len);
    if payload.len() > max {
        return Err(ChatError::InvalidPayload(format!(
            "message is {} bytes, at most {} fit in a frame",
            payload.len(),
            max
        )));
    }
    Ok(())
}

fn check_payload_text(payload: &str) -> Result<()> {
    if payload.trim().is_empty() {
        return Err(ChatError::InvalidPayload("message is empty".to_string()));
    }
    if payload.contains('\n') || payload.contains('\r') {
        return Err(ChatError::InvalidPayload(
            "message must fit on one line".to_string(),
        ));
    }
    if payload == APPROVE_TOKEN || payload == ABORT_TOKEN {
        return Err(ChatError::InvalidPayload(format!(
            "{:?} is reserved for votes",
            payload
        )));
    }
    if payload.contains(EDIT_REQUEST_MARKER.trim()) || payload.contains(OVERWRITE_MARKER.trim()) {
        return Err(ChatError::InvalidPayload(
            "message contains a reserved marker".to_string(),
        ));
    }
    Ok(())
}

/// Peer-to-server request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequest {
    Help,
    List,
    Exit,
    Observe(ObservationKind, ObservationRecord),
    Unknown(String),
}

impl ServerRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "/help" => Ok(ServerRequest::Help),
            "/list" => Ok(ServerRequest::List),
            "/exit" => Ok(ServerRequest::Exit),
            "/msg" => Ok(ServerRequest::Observe(
                ObservationKind::Chat,
                ObservationRecord::parse(rest)?,
            )),
            "/edit" => Ok(ServerRequest::Observe(
                ObservationKind::Edit,
                ObservationRecord::parse(rest)?,
            )),
            other => Ok(ServerRequest::Unknown(other.to_string())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ServerRequest::Help => "/help".to_string(),
            ServerRequest::List => "/list".to_string(),
            ServerRequest::Exit => "/exit".to_string(),
            ServerRequest::Observe(kind, record) => {
                format!("{} {}", kind.command(), record.encode())
            }
            ServerRequest::Unknown(command) => command.clone(),
        }
    }
}

const WELCOME_PREFIX: &str = "Welcome to the Messenger Server: you are peer ";
const WELCOME_SUFFIX: &str = "; type /help for available commands";
const COMMANDS: &str = "Commands: /msg, /edit, /list, /help, /exit";
const DISCONNECTED: &str = "You have been disconnected";
const NOT_FOUND_SUFFIX: &str = ": command not found, try /help";
const REJECTED_PREFIX: &str = "rejected: ";

/// Server-to-peer line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotice {
    Welcome(PeerId),
    Commands,
    Peers(MembershipList),
    Disconnected,
    NotFound(String),
    Rejected(String),
    Text(String),
}

impl ServerNotice {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix(WELCOME_PREFIX) {
            let id = rest.strip_suffix(WELCOME_SUFFIX).unwrap_or(rest);
            return parse_field(Some(id.trim()), "peer id").map(ServerNotice::Welcome);
        }
        if let Some(list) = MembershipList::parse(line) {
            return list.map(ServerNotice::Peers);
        }
        if line == COMMANDS {
            return Ok(ServerNotice::Commands);
        }
        if line == DISCONNECTED {
            return Ok(ServerNotice::Disconnected);
        }
        if let Some(command) = line.strip_suffix(NOT_FOUND_SUFFIX) {
            return Ok(ServerNotice::NotFound(command.to_string()));
        }
        if let Some(reason) = line.strip_prefix(REJECTED_PREFIX) {
            return Ok(ServerNotice::Rejected(reason.to_string()));
        }
        Ok(ServerNotice::Text(line.to_string()))
    }

    pub fn encode(&self) -> String {
        match self {
            ServerNotice::Welcome(id) => format!("{}{}{}", WELCOME_PREFIX, id, WELCOME_SUFFIX),
            ServerNotice::Commands => COMMANDS.to_string(),
            ServerNotice::Peers(list) => list.to_string(),
            ServerNotice::Disconnected => DISCONNECTED.to_string(),
            ServerNotice::NotFound(command) => format!("{}{}", command, NOT_FOUND_SUFFIX),
            ServerNotice::Rejected(reason) => format!("{}{}", REJECTED_PREFIX, reason),
            ServerNotice::Text(text) => text.clone(),
        }
    }
}

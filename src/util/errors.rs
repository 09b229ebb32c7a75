use std::io;

#[derive(Debug)]
pub enum ChatError {
    TransportUnavailable(String),
    SendFailure(String),
    MalformedFrame(String),
    FrameTooLarge { len: usize, max: usize },
    IndexOutOfRange { index: usize, len: usize },
    VoteTimeout,
    StaleMembership,
    RoundInProgress(u64),
    NoPendingVote,
    InvalidPayload(String),
    DirectoryFull(usize),
    StorageError(String),
    IoError(io::Error),
    InvalidConfig(String),
    Internal(String),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::TransportUnavailable(msg) => write!(f, "Transport unavailable: {}", msg),
            ChatError::SendFailure(msg) => write!(f, "Send failure: {}", msg),
            ChatError::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            ChatError::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds maximum of {}", len, max)
            }
            ChatError::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range for log of length {}", index, len)
            }
            ChatError::VoteTimeout => write!(f, "Vote round timed out"),
            ChatError::StaleMembership => {
                write!(f, "Membership snapshot is stale, run /list first")
            }
            ChatError::RoundInProgress(round) => {
                write!(f, "Edit round {} is still collecting votes", round)
            }
            ChatError::NoPendingVote => write!(f, "No edit request is waiting for a vote"),
            ChatError::InvalidPayload(msg) => write!(f, "Invalid payload: {}", msg),
            ChatError::DirectoryFull(capacity) => {
                write!(f, "Directory is full ({} peers)", capacity)
            }
            ChatError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            ChatError::IoError(err) => write!(f, "IO error: {}", err),
            ChatError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<io::Error> for ChatError {
    fn from(err: io::Error) -> Self {
        ChatError::IoError(err)
    }
}

impl From<tokio_util::codec::LinesCodecError> for ChatError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => {
                ChatError::MalformedFrame("line exceeds maximum length".to_string())
            }
            tokio_util::codec::LinesCodecError::Io(err) => ChatError::IoError(err),
        }
    }
}

impl From<actix::MailboxError> for ChatError {
    fn from(err: actix::MailboxError) -> Self {
        ChatError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

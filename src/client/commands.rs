use crate::types::LogIndex;
use crate::util::errors::{ChatError, Result};
use crate::vote::Vote;

/// A line typed at the peer console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Help,
    Chat(String),
    Edit { index: LogIndex, payload: String },
    List,
    Vote(Vote),
    ShowLog,
    Exit,
}

pub const USAGE: &str = "\
/help                      list commands
/msg <text>                send a chat message to every peer
/edit <text> - <index>     ask every peer to replace entry <index> with <text>
/list                      refresh the list of peers
/GO, /ABORT                answer the pending edit request
/log                       print the local log
/exit                      disconnect and quit";

/// Split a command line into its lowercased name and the untouched rest.
/// Example: "/msg  hello  world" -> ("msg", " hello  world")
pub fn parse_command<'a>(text: &'a str, prefix: &str) -> Option<(String, &'a str)> {
    let text = text.trim();
    let without_prefix = text.strip_prefix(prefix)?;

    let (command, rest) = match without_prefix.find(char::is_whitespace) {
        Some(at) => without_prefix.split_at(at),
        None => (without_prefix, ""),
    };

    if command.is_empty() {
        return None;
    }

    Some((command.to_lowercase(), rest))
}

impl PeerCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let (command, rest) = parse_command(line, "/").ok_or_else(|| {
            ChatError::InvalidPayload(format!("{:?} is not a command, try /help", line.trim()))
        })?;
        let rest = rest.trim();

        match command.as_str() {
            "help" => Ok(PeerCommand::Help),
            "msg" if !rest.is_empty() => Ok(PeerCommand::Chat(rest.to_string())),
            "msg" => Err(ChatError::InvalidPayload("usage: /msg <text>".to_string())),
            "edit" => parse_edit(rest),
            "list" => Ok(PeerCommand::List),
            "go" => Ok(PeerCommand::Vote(Vote::Approve)),
            "abort" => Ok(PeerCommand::Vote(Vote::Abort)),
            "log" => Ok(PeerCommand::ShowLog),
            "exit" => Ok(PeerCommand::Exit),
            other => Err(ChatError::InvalidPayload(format!(
                "/{}: command not found, try /help",
                other
            ))),
        }
    }
}

fn parse_edit(rest: &str) -> Result<PeerCommand> {
    let usage = || ChatError::InvalidPayload("usage: /edit <text> - <index>".to_string());

    let (payload, index) = rest.rsplit_once('-').ok_or_else(usage)?;
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(usage());
    }
    let index = index.trim().parse().map_err(|_| usage())?;

    Ok(PeerCommand::Edit {
        index,
        payload: payload.to_string(),
    })
}

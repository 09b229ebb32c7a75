use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};

use super::commands::{PeerCommand, USAGE};
use crate::peer::{Peer, PeerEvent};
use crate::util::errors::Result;

/// Print peer events as they arrive.
pub fn spawn_event_printer(mut events: mpsc::UnboundedReceiver<PeerEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", event);
            if event == PeerEvent::Disconnected {
                break;
            }
        }
    });
}

/// Read commands from stdin until `/exit` or end of input.
pub async fn run(peer: Arc<Peer>, events: mpsc::UnboundedReceiver<PeerEvent>) -> Result<()> {
    spawn_event_printer(events);

    println!("You are peer {} listening on {}", peer.id(), peer.endpoint());
    println!("{}", USAGE);

    let mut stdin = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    while let Some(line) = stdin.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let command = match PeerCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        if command == PeerCommand::Exit {
            peer.exit().await?;
            println!("Bye");
            return Ok(());
        }

        if let Err(e) = execute(&peer, command).await {
            println!("{}", e);
        }
    }

    // stdin closed
    peer.exit().await
}

async fn execute(peer: &Peer, command: PeerCommand) -> Result<()> {
    match command {
        PeerCommand::Help => {
            println!("{}", USAGE);
            peer.help().await?;
        }
        PeerCommand::Chat(payload) => {
            let index = peer.chat(&payload).await?;
            println!("[{}] you: {}", index, payload);
        }
        PeerCommand::Edit { index, payload } => {
            let round = peer.propose_edit(index, &payload).await?;
            println!("Edit round {} started, waiting for votes", round);
        }
        PeerCommand::List => peer.request_membership().await?,
        PeerCommand::Vote(vote) => peer.vote(vote).await?,
        PeerCommand::ShowLog => {
            let entries = peer.log_snapshot().await;
            if entries.is_empty() {
                println!("(log is empty)");
            }
            for (index, payload) in entries.iter().enumerate() {
                println!("{}: {}", index, payload);
            }
        }
        PeerCommand::Exit => {}
    }
    Ok(())
}

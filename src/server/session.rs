use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::membership::Directory;
use crate::network::codec::{BoundedLinesCodec, Line};
use crate::network::{ServerNotice, ServerRequest};
use crate::observer::Observer;
use crate::types::PeerId;
use crate::util::errors::{ChatError, Result};

/// State shared by every session
#[derive(Clone)]
pub struct Shared {
    pub directory: Arc<Mutex<Directory>>,
    pub observer: Arc<Mutex<Observer>>,
    pub max_frame_len: usize,
}

/// Serve one connected peer until it exits or the connection drops.
pub async fn run_session(stream: TcpStream, addr: SocketAddr, shared: Shared) -> Result<()> {
    let mut lines = Framed::new(stream, BoundedLinesCodec::new(shared.max_frame_len));

    let registered = shared.directory.lock().await.register();
    let id = match registered {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Refusing {}: {}", addr, e);
            lines.send(ServerNotice::Rejected(e.to_string()).encode()).await?;
            return Err(e);
        }
    };

    tracing::info!("Peer {} connected from {}", id, addr);

    let result = serve(&mut lines, id, &shared).await;
    shared.directory.lock().await.deregister(id);

    match &result {
        Ok(()) => tracing::info!("Peer {} disconnected", id),
        Err(e) => tracing::warn!("Peer {} connection lost: {}", id, e),
    }
    result
}

async fn serve(
    lines: &mut Framed<TcpStream, BoundedLinesCodec>,
    id: PeerId,
    shared: &Shared,
) -> Result<()> {
    lines.send(ServerNotice::Welcome(id).encode()).await?;

    while let Some(line) = lines.next().await {
        let line = match line? {
            Line::Text(line) => line,
            Line::Oversize => {
                tracing::warn!("Peer {} sent an oversize line", id);
                let reason = format!("line exceeds {} bytes", shared.max_frame_len);
                lines.send(ServerNotice::Rejected(reason).encode()).await?;
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request = match ServerRequest::parse(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Peer {} sent a malformed line {:?}: {}", id, line, e);
                lines.send(ServerNotice::Rejected(e.to_string()).encode()).await?;
                continue;
            }
        };

        tracing::debug!("Peer {} -> {:?}", id, request);

        match request {
            ServerRequest::Help => {
                lines.send(ServerNotice::Commands.encode()).await?;
            }
            ServerRequest::List => {
                let snapshot = shared.directory.lock().await.snapshot();
                tracing::info!("Peer {} asked who's online: {}", id, snapshot);
                lines.send(ServerNotice::Peers(snapshot).encode()).await?;
            }
            ServerRequest::Exit => {
                lines.send(ServerNotice::Disconnected.encode()).await?;
                return Ok(());
            }
            ServerRequest::Observe(kind, record) => {
                shared.observer.lock().await.observe(kind, record);
            }
            ServerRequest::Unknown(command) => {
                lines.send(ServerNotice::NotFound(command).encode()).await?;
            }
        }
    }

    Err(ChatError::TransportUnavailable(format!(
        "peer {} closed the connection",
        id
    )))
}

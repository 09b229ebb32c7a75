use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use super::codec::{check_frame_len, BoundedLinesCodec, Line};
use super::messages::ServerNotice;
use crate::types::PeerId;
use crate::util::errors::{ChatError, Result};

/// Reliable, ordered line channel from a peer to the server.
#[async_trait]
pub trait ServerLink: Send + Sync {
    async fn send_line(&self, line: String) -> Result<()>;
}

type LineSink = SplitSink<Framed<TcpStream, BoundedLinesCodec>, String>;
type LineStream = SplitStream<Framed<TcpStream, BoundedLinesCodec>>;

pub struct TcpServerLink {
    sink: Mutex<LineSink>,
    max_frame_len: usize,
}

/// Receiving half of the server connection
pub struct ServerLines {
    stream: LineStream,
}

impl ServerLines {
    /// Next line from the server, `None` once the connection is closed.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        let line = self.stream.next().await?;
        Some(match line {
            Ok(Line::Text(text)) => Ok(text),
            Ok(Line::Oversize) => Err(ChatError::MalformedFrame(
                "line from server exceeds maximum length".to_string(),
            )),
            Err(e) => Err(e.into()),
        })
    }
}

impl TcpServerLink {
    /// Connect, then wait for the welcome line carrying this peer's id.
    pub async fn connect(
        server_addr: &str,
        max_frame_len: usize,
    ) -> Result<(Self, ServerLines, PeerId)> {
        let stream = TcpStream::connect(server_addr).await.map_err(|e| {
            ChatError::TransportUnavailable(format!("cannot reach server {}: {}", server_addr, e))
        })?;

        tracing::info!("Connected to server {}", server_addr);

        let (sink, stream) = Framed::new(stream, BoundedLinesCodec::new(max_frame_len)).split();
        let mut lines = ServerLines { stream };

        let id = loop {
            let line = match lines.next_line().await {
                Some(line) => line?,
                None => {
                    return Err(ChatError::TransportUnavailable(
                        "server closed the connection before welcoming us".to_string(),
                    ))
                }
            };

            match ServerNotice::parse(&line)? {
                ServerNotice::Welcome(id) => break id,
                ServerNotice::Rejected(reason) => {
                    return Err(ChatError::TransportUnavailable(format!(
                        "server rejected us: {}",
                        reason
                    )))
                }
                other => tracing::debug!("Ignoring {:?} before welcome", other),
            }
        };

        let link = Self {
            sink: Mutex::new(sink),
            max_frame_len,
        };

        Ok((link, lines, id))
    }
}

#[async_trait]
impl ServerLink for TcpServerLink {
    async fn send_line(&self, line: String) -> Result<()> {
        check_frame_len(&line, self.max_frame_len)?;

        let mut sink = self.sink.lock().await;
        sink.send(line)
            .await
            .map_err(|e| ChatError::SendFailure(format!("to server: {}", e)))
    }
}

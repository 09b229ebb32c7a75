//! Rendezvous server: hands out peer ids, answers membership queries and
//! watches reported state changes for concurrent updates.

pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::membership::Directory;
use crate::observer::Observer;
use crate::util::errors::{ChatError, Result};
use session::{run_session, Shared};

pub struct Server {
    listener: TcpListener,
    shared: Shared,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
            ChatError::TransportUnavailable(format!("cannot listen on {}: {}", config.listen_addr, e))
        })?;

        let shared = Shared {
            directory: Arc::new(Mutex::new(Directory::new(config.max_peers))),
            observer: Arc::new(Mutex::new(Observer::new())),
            max_frame_len: config.max_frame_len,
        };

        Ok(Self { listener, shared })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn directory(&self) -> Arc<Mutex<Directory>> {
        self.shared.directory.clone()
    }

    pub fn observer(&self) -> Arc<Mutex<Observer>> {
        self.shared.observer.clone()
    }

    /// Accept peers until the task is dropped.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Server listening on {}", self.local_addr()?);

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = run_session(stream, addr, shared).await {
                    tracing::debug!("Session with {} ended: {}", addr, e);
                }
            });
        }
    }
}

use actix::prelude::*;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::events::PeerEvent;
use crate::config::PeerConfig;
use crate::db::LocalLog;
use crate::multicast::{DuplicateFilter, Multicast};
use crate::network::messages::validate_payload;
use crate::network::{
    PeerFrame, PeerRegistry, ServerLines, ServerLink, ServerNotice, ServerRequest, TcpServerLink,
    Transport, UdpTransport,
};
use crate::observer::{ObservationKind, ObservationRecord};
use crate::storage::FileLogStorage;
use crate::types::{LogIndex, PeerEndpoint, PeerId, RoundId};
use crate::util::errors::{ChatError, Result};
use crate::util::time::unix_now;
use crate::vote::{
    Cancel, CastVote, Coordinator, EditPhase, EditProposal, GetRound, Propose, RoundOutcome,
    RoundResult, Vote,
};

/// Edit request waiting for this peer's vote
#[derive(Debug, Clone)]
struct PendingVote {
    proposer: PeerId,
    endpoint: PeerEndpoint,
    round: RoundId,
    index: LogIndex,
    payload: String,
}

/// One participant: its log copy, its view of the membership and its side
/// of the chat and edit protocols.
pub struct Peer {
    id: PeerId,
    config: PeerConfig,
    log: Mutex<LocalLog>,
    registry: Mutex<PeerRegistry>,
    snapshots: watch::Sender<u64>,
    multicast: Multicast,
    server: Arc<dyn ServerLink>,
    coordinator: Addr<Coordinator>,
    pending: Mutex<Option<PendingVote>>,
    dedup: Mutex<DuplicateFilter>,
    events: mpsc::UnboundedSender<PeerEvent>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Peer {
    /// Register with the server, bind the datagram socket at the derived
    /// endpoint and open the on-disk log.
    pub async fn connect(
        config: PeerConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>)> {
        config.validate()?;

        let (link, lines, id) =
            TcpServerLink::connect(&config.server_addr, config.max_frame_len).await?;
        let endpoint = PeerEndpoint::derive(config.host, config.port_base, id)?;
        let transport = UdpTransport::bind(endpoint, config.max_frame_len).await?;

        let storage = FileLogStorage::new(&config.data_dir, endpoint.port())?;
        let log = if config.resume_log {
            LocalLog::open(Box::new(storage))?
        } else {
            LocalLog::new(Box::new(storage))
        };

        tracing::info!("Joined as peer {} ({} entries in log)", id, log.len());

        Ok(Self::start(
            id,
            config,
            log,
            Arc::new(transport),
            Arc::new(link),
            lines,
        ))
    }

    /// Wire up an already registered peer and spawn its receiver tasks.
    /// Must run inside an actix system.
    pub fn start(
        id: PeerId,
        config: PeerConfig,
        log: LocalLog,
        transport: Arc<dyn Transport>,
        server: Arc<dyn ServerLink>,
        lines: ServerLines,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(0);

        let coordinator = Coordinator::new(config.vote_timeout(), outcomes_tx).start();
        let registry = PeerRegistry::new(config.host, config.port_base);
        let dedup = DuplicateFilter::new(config.dedup_window);
        let multicast = Multicast::new(transport, config.max_frame_len);

        let peer = Arc::new(Self {
            id,
            config,
            log: Mutex::new(log),
            registry: Mutex::new(registry),
            snapshots,
            multicast,
            server,
            coordinator,
            pending: Mutex::new(None),
            dedup: Mutex::new(dedup),
            events: events_tx,
            tasks: StdMutex::new(Vec::new()),
        });

        let tasks = vec![
            tokio::spawn(peer.clone().receive_datagrams()),
            tokio::spawn(peer.clone().receive_server_lines(lines)),
            tokio::spawn(peer.clone().receive_outcomes(outcomes_rx)),
        ];
        if let Ok(mut handles) = peer.tasks.lock() {
            handles.extend(tasks);
        }

        (peer, events_rx)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn endpoint(&self) -> PeerEndpoint {
        self.multicast.transport().local_endpoint()
    }

    pub async fn log_snapshot(&self) -> Vec<String> {
        self.log.lock().await.snapshot()
    }

    pub async fn phase(&self) -> Result<EditPhase> {
        if self.coordinator.send(GetRound).await?.is_some() {
            return Ok(EditPhase::Proposed);
        }
        if self.pending.lock().await.is_some() {
            return Ok(EditPhase::AwaitingDecision);
        }
        Ok(EditPhase::Idle)
    }

    /// Ask the server for the current membership. The answer arrives on the
    /// server line and refreshes the registry.
    pub async fn request_membership(&self) -> Result<()> {
        self.server.send_line(ServerRequest::List.encode()).await
    }

    pub async fn help(&self) -> Result<()> {
        self.server.send_line(ServerRequest::Help.encode()).await
    }

    /// Disseminate a chat message, then append it locally and report it.
    pub async fn chat(&self, payload: &str) -> Result<LogIndex> {
        validate_payload(payload, self.config.max_frame_len)?;
        let targets = self.acquire_targets().await?;

        let delivered = self
            .multicast
            .disseminate(&targets, &PeerFrame::Chat(payload.to_string()))
            .await?;

        let index = self.log.lock().await.append(payload)?;
        tracing::info!(
            "Chat {:?} stored at {} and sent to {} peers",
            payload,
            index,
            delivered
        );

        self.report(ObservationKind::Chat, payload, index + 1).await;
        Ok(index)
    }

    /// Open a vote round for replacing entry `index` with `payload`.
    pub async fn propose_edit(&self, index: LogIndex, payload: &str) -> Result<RoundId> {
        validate_payload(payload, self.config.max_frame_len)?;

        let len = self.log.lock().await.len();
        if index >= len {
            return Err(ChatError::IndexOutOfRange { index, len });
        }

        let targets = self.acquire_targets().await?;
        let voters = targets.iter().map(|(id, _)| *id).collect();

        let round = self
            .coordinator
            .send(Propose {
                proposal: EditProposal::new(self.id, index, payload),
                voters,
            })
            .await??;

        let request = PeerFrame::VoteRequest {
            proposer: self.id,
            round,
            index,
            payload: payload.to_string(),
        };
        let delivered = match self.multicast.disseminate(&targets, &request).await {
            Ok(delivered) => delivered,
            Err(e) => {
                self.coordinator.send(Cancel { round }).await?;
                return Err(e);
            }
        };

        tracing::info!(
            "Edit round {} for entry {} sent to {}/{} voters",
            round,
            index,
            delivered,
            targets.len()
        );
        Ok(round)
    }

    /// Answer the pending edit request.
    pub async fn vote(&self, vote: Vote) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or(ChatError::NoPendingVote)?;

        self.multicast.send_vote(pending.endpoint, vote).await?;
        tracing::info!(
            "Voted {:?} on round {} from peer {} (entry {} -> {:?})",
            vote,
            pending.round,
            pending.proposer,
            pending.index,
            pending.payload
        );
        Ok(())
    }

    /// Tell the server we're leaving and stop the receiver tasks.
    pub async fn exit(&self) -> Result<()> {
        let result = self.server.send_line(ServerRequest::Exit.encode()).await;
        self.shutdown();
        result
    }

    pub fn shutdown(&self) {
        if let Ok(mut handles) = self.tasks.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }

    /// Targets for one chat or edit, taken from a membership snapshot no
    /// earlier action has used.
    async fn acquire_targets(&self) -> Result<Vec<(PeerId, PeerEndpoint)>> {
        // Subscribe first so a snapshot landing in between is not missed
        let mut updates = self.snapshots.subscribe();

        if let Some(targets) = self.registry.lock().await.take_fresh(self.id) {
            return Ok(targets);
        }

        if !self.config.auto_refresh {
            return Err(ChatError::StaleMembership);
        }

        tracing::debug!("Membership is stale, refreshing");
        self.request_membership().await?;

        let wait = async {
            loop {
                if updates.changed().await.is_err() {
                    return Err(ChatError::StaleMembership);
                }
                if let Some(targets) = self.registry.lock().await.take_fresh(self.id) {
                    return Ok(targets);
                }
            }
        };

        tokio::time::timeout(self.config.refresh_timeout(), wait)
            .await
            .map_err(|_| ChatError::StaleMembership)?
    }

    /// Tell the server about a chat or edit that already happened. The local
    /// and remote effects stand even when the report is lost.
    async fn report(&self, kind: ObservationKind, payload: &str, index: LogIndex) {
        let record = ObservationRecord::new(payload, unix_now(), index);
        let line = ServerRequest::Observe(kind, record).encode();
        if let Err(e) = self.server.send_line(line).await {
            tracing::warn!("Failed to report {} at {} to the server: {}", kind, index, e);
        }
    }

    fn notify(&self, event: PeerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No one is listening for peer events");
        }
    }

    pub(crate) async fn handle_datagram(&self, from: PeerEndpoint, text: &str) {
        let frame = match PeerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Discarding datagram from {}: {}", from, e);
                return;
            }
        };

        if !frame.is_vote() && !self.dedup.lock().await.accept(text) {
            tracing::debug!("Dropping duplicate {:?} from {}", text, from);
            return;
        }

        match frame {
            PeerFrame::Chat(payload) => {
                let appended = self.log.lock().await.append(payload.as_str());
                match appended {
                    Ok(index) => {
                        let sender = self.registry.lock().await.peer_at(&from);
                        self.notify(PeerEvent::ChatReceived {
                            from: sender,
                            index,
                            payload,
                        });
                    }
                    Err(e) => tracing::warn!("Failed to store chat from {}: {}", from, e),
                }
            }
            PeerFrame::VoteRequest {
                proposer,
                round,
                index,
                payload,
            } => {
                let request = PendingVote {
                    proposer,
                    endpoint: from,
                    round,
                    index,
                    payload: payload.clone(),
                };
                if let Some(previous) = self.pending.lock().await.replace(request) {
                    tracing::info!(
                        "Edit request {} from peer {} replaced unanswered request {} from peer {}",
                        round,
                        proposer,
                        previous.round,
                        previous.proposer
                    );
                }
                self.notify(PeerEvent::VoteRequested {
                    proposer,
                    round,
                    index,
                    payload,
                });
            }
            PeerFrame::Overwrite { index, payload } => {
                let applied = self.log.lock().await.overwrite(index, payload.as_str());
                match applied {
                    Ok(()) => self.notify(PeerEvent::EditApplied { index, payload }),
                    Err(e) => tracing::warn!("Cannot apply edit from {}: {}", from, e),
                }
            }
            PeerFrame::Vote(vote) => match self.registry.lock().await.peer_at(&from) {
                Some(voter) => self.coordinator.do_send(CastVote { voter, vote }),
                None => tracing::warn!("Ignoring {:?} from unknown endpoint {}", vote, from),
            },
        }
    }

    pub(crate) async fn handle_server_line(&self, line: &str) {
        let notice = match ServerNotice::parse(line) {
            Ok(notice) => notice,
            Err(e) => {
                tracing::warn!("Unreadable line from server {:?}: {}", line, e);
                return;
            }
        };

        match notice {
            ServerNotice::Peers(list) => {
                let applied = self.registry.lock().await.apply_snapshot(&list);
                match applied {
                    Ok(seq) => {
                        self.snapshots.send_replace(seq);
                        self.notify(PeerEvent::Membership(list));
                    }
                    Err(e) => tracing::warn!("Cannot use membership {}: {}", list, e),
                }
            }
            // Reported once the connection actually closes
            ServerNotice::Disconnected => tracing::info!("Server confirmed disconnect"),
            other => self.notify(PeerEvent::ServerText(other.encode())),
        }
    }

    pub(crate) async fn conclude(&self, outcome: RoundOutcome) {
        let RoundOutcome {
            round,
            proposal,
            voters,
            result,
        } = outcome;

        match result {
            RoundResult::Committed => {
                if let Err(e) = self.commit(&proposal, &voters).await {
                    tracing::warn!("Edit round {} failed to commit: {}", round, e);
                    return;
                }
                self.notify(PeerEvent::EditCommitted {
                    round,
                    index: proposal.index,
                    payload: proposal.payload,
                });
            }
            RoundResult::Aborted { by } => self.notify(PeerEvent::EditAborted {
                round,
                index: proposal.index,
                by,
            }),
            RoundResult::TimedOut { missing } => {
                tracing::warn!("{}", ChatError::VoteTimeout);
                self.notify(PeerEvent::EditTimedOut {
                    round,
                    index: proposal.index,
                    missing,
                });
            }
        }
    }

    async fn commit(&self, proposal: &EditProposal, voters: &[PeerId]) -> Result<()> {
        self.log
            .lock()
            .await
            .overwrite(proposal.index, proposal.payload.as_str())?;

        self.report(ObservationKind::Edit, &proposal.payload, proposal.index)
            .await;

        let targets: Vec<_> = {
            let registry = self.registry.lock().await;
            voters
                .iter()
                .filter_map(|id| registry.endpoint_of(*id).map(|ep| (*id, ep)))
                .collect()
        };

        let overwrite = PeerFrame::Overwrite {
            index: proposal.index,
            payload: proposal.payload.clone(),
        };
        self.multicast.disseminate(&targets, &overwrite).await?;
        Ok(())
    }

    async fn receive_datagrams(self: Arc<Self>) {
        loop {
            match self.multicast.transport().recv_from().await {
                Ok((from, text)) => self.handle_datagram(from, &text).await,
                Err(ChatError::TransportUnavailable(reason)) => {
                    tracing::warn!("Datagram receiver stopped: {}", reason);
                    break;
                }
                Err(e) => tracing::warn!("Discarding datagram: {}", e),
            }
        }
    }

    async fn receive_server_lines(self: Arc<Self>, mut lines: ServerLines) {
        while let Some(line) = lines.next_line().await {
            match line {
                Ok(line) => self.handle_server_line(&line).await,
                Err(ChatError::MalformedFrame(reason)) => {
                    tracing::warn!("Discarding line from server: {}", reason)
                }
                Err(e) => {
                    tracing::warn!("Server connection failed: {}", e);
                    break;
                }
            }
        }

        tracing::info!("Server connection closed");
        self.notify(PeerEvent::Disconnected);
    }

    async fn receive_outcomes(self: Arc<Self>, mut outcomes: mpsc::UnboundedReceiver<RoundOutcome>) {
        while let Some(outcome) = outcomes.recv().await {
            self.conclude(outcome).await;
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

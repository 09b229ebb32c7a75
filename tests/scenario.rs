use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;

use peerlog::config::{PeerConfig, ServerConfig};
use peerlog::db::LocalLog;
use peerlog::network::messages::max_payload_len;
use peerlog::network::{MemoryNetwork, ServerLink, TcpServerLink, Transport};
use peerlog::observer::{ObservationKind, Observer};
use peerlog::peer::{Peer, PeerEvent};
use peerlog::server::Server;
use peerlog::storage::MemoryLogStorage;
use peerlog::types::PeerEndpoint;
use peerlog::util::errors::{ChatError, Result};
use peerlog::vote::{EditPhase, Vote};

async fn spawn_server() -> SocketAddr {
    spawn_observed_server().await.0
}

async fn spawn_observed_server() -> (SocketAddr, Arc<Mutex<Observer>>) {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    };
    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let observer = server.observer();
    tokio::spawn(server.run());
    (addr, observer)
}

/// Wait until the server holds `count` records of `kind`.
async fn expect_records(observer: &Arc<Mutex<Observer>>, kind: ObservationKind, count: usize) {
    let wait = async {
        while observer.lock().await.records(kind).len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for server records")
}

/// Server link whose `/msg` and `/edit` reports never arrive
struct LosesReports(TcpServerLink);

#[async_trait]
impl ServerLink for LosesReports {
    async fn send_line(&self, line: String) -> Result<()> {
        if line.starts_with("/msg ") || line.starts_with("/edit ") {
            return Err(ChatError::SendFailure("report lost".to_string()));
        }
        self.0.send_line(line).await
    }
}

async fn join(
    network: &MemoryNetwork,
    config: PeerConfig,
) -> (Arc<Peer>, UnboundedReceiver<PeerEvent>) {
    join_with(network, config, |link| Arc::new(link) as Arc<dyn ServerLink>).await
}

async fn join_with<F>(
    network: &MemoryNetwork,
    config: PeerConfig,
    wrap: F,
) -> (Arc<Peer>, UnboundedReceiver<PeerEvent>)
where
    F: FnOnce(TcpServerLink) -> Arc<dyn ServerLink>,
{
    let (link, lines, id) = TcpServerLink::connect(&config.server_addr, config.max_frame_len)
        .await
        .unwrap();
    let endpoint = PeerEndpoint::derive(config.host, config.port_base, id).unwrap();
    let transport = network.bind(endpoint, config.max_frame_len).unwrap();
    let log = LocalLog::new(Box::new(MemoryLogStorage::new()));

    Peer::start(id, config, log, Arc::new(transport), wrap(link), lines)
}

fn peer_config(server: SocketAddr) -> PeerConfig {
    PeerConfig {
        server_addr: server.to_string(),
        ..Default::default()
    }
}

/// Wait for the first event matching `pred`, skipping the others.
async fn expect_event<F>(events: &mut UnboundedReceiver<PeerEvent>, pred: F) -> PeerEvent
where
    F: Fn(&PeerEvent) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for peer event")
}

fn is_vote_request(event: &PeerEvent) -> bool {
    matches!(event, PeerEvent::VoteRequested { .. })
}

#[actix_rt::test]
async fn test_three_peers_chat_and_vote_on_edits() {
    let server = spawn_server().await;
    let network = MemoryNetwork::new();

    let (a, mut a_events) = join(&network, peer_config(server)).await;
    let (b, mut b_events) = join(&network, peer_config(server)).await;
    let (c, mut c_events) = join(&network, peer_config(server)).await;
    assert_eq!((a.id(), b.id(), c.id()), (0, 1, 2));

    // Membership
    a.request_membership().await.unwrap();
    let event = expect_event(&mut a_events, |e| matches!(e, PeerEvent::Membership(_))).await;
    assert_eq!(event.to_string(), "Peers: 0 1 2");

    // Chat replicates at the same index everywhere
    assert_eq!(a.chat("hello").await.unwrap(), 0);
    for events in [&mut b_events, &mut c_events] {
        let event = expect_event(events, |e| matches!(e, PeerEvent::ChatReceived { .. })).await;
        assert!(matches!(
            event,
            PeerEvent::ChatReceived { index: 0, ref payload, .. } if payload == "hello"
        ));
    }

    // Nothing to vote on yet
    assert!(matches!(b.vote(Vote::Approve).await, Err(ChatError::NoPendingVote)));

    // One abort leaves every log untouched
    let first = a.propose_edit(0, "edited").await.unwrap();
    expect_event(&mut b_events, is_vote_request).await;
    expect_event(&mut c_events, is_vote_request).await;
    b.vote(Vote::Approve).await.unwrap();
    c.vote(Vote::Abort).await.unwrap();

    let event = expect_event(&mut a_events, |e| matches!(e, PeerEvent::EditAborted { .. })).await;
    assert_eq!(
        event,
        PeerEvent::EditAborted {
            round: first,
            index: 0,
            by: 2
        }
    );
    for peer in [&a, &b, &c] {
        assert_eq!(peer.log_snapshot().await, vec!["hello".to_string()]);
    }

    // The same proposal again, approved by everyone
    let second = a.propose_edit(0, "edited").await.unwrap();
    assert_ne!(first, second);
    expect_event(&mut b_events, is_vote_request).await;
    expect_event(&mut c_events, is_vote_request).await;
    b.vote(Vote::Approve).await.unwrap();
    c.vote(Vote::Approve).await.unwrap();

    expect_event(&mut a_events, |e| matches!(e, PeerEvent::EditCommitted { .. })).await;
    for events in [&mut b_events, &mut c_events] {
        let event = expect_event(events, |e| matches!(e, PeerEvent::EditApplied { .. })).await;
        assert_eq!(
            event,
            PeerEvent::EditApplied {
                index: 0,
                payload: "edited".to_string()
            }
        );
    }
    for peer in [&a, &b, &c] {
        assert_eq!(peer.log_snapshot().await, vec!["edited".to_string()]);
    }
}

#[actix_rt::test]
async fn test_edit_out_of_range_opens_no_round() {
    let server = spawn_server().await;
    let network = MemoryNetwork::new();
    let (a, _a_events) = join(&network, peer_config(server)).await;

    let result = a.propose_edit(0, "edited").await;
    assert!(matches!(
        result,
        Err(ChatError::IndexOutOfRange { index: 0, len: 0 })
    ));
    assert_eq!(a.phase().await.unwrap(), EditPhase::Idle);
}

#[actix_rt::test]
async fn test_each_snapshot_serves_one_action() {
    let server = spawn_server().await;
    let network = MemoryNetwork::new();
    let config = PeerConfig {
        auto_refresh: false,
        ..peer_config(server)
    };
    let (a, mut a_events) = join(&network, config).await;

    assert!(matches!(a.chat("early").await, Err(ChatError::StaleMembership)));

    a.request_membership().await.unwrap();
    expect_event(&mut a_events, |e| matches!(e, PeerEvent::Membership(_))).await;

    assert_eq!(a.chat("first").await.unwrap(), 0);
    assert!(matches!(a.chat("second").await, Err(ChatError::StaleMembership)));
    assert_eq!(a.log_snapshot().await, vec!["first".to_string()]);
}

#[actix_rt::test]
async fn test_repeated_datagram_applies_once() {
    let server = spawn_server().await;
    let network = MemoryNetwork::new();

    let (a, mut a_events) = join(&network, peer_config(server)).await;
    let (b, mut b_events) = join(&network, peer_config(server)).await;

    // A bare sender standing in for a peer that retransmits
    let config = peer_config(server);
    let outsider = network
        .bind(
            PeerEndpoint::derive(config.host, config.port_base, 40).unwrap(),
            config.max_frame_len,
        )
        .unwrap();

    outsider.send_to(b.endpoint(), "again").await.unwrap();
    outsider.send_to(b.endpoint(), "again").await.unwrap();
    outsider.send_to(b.endpoint(), "done").await.unwrap();

    expect_event(&mut b_events, |e| {
        matches!(e, PeerEvent::ChatReceived { payload, .. } if payload == "done")
    })
    .await;
    assert_eq!(
        b.log_snapshot().await,
        vec!["again".to_string(), "done".to_string()]
    );

    // Votes from endpoints outside the membership are ignored
    assert_eq!(a.chat("x").await.unwrap(), 0);
    expect_event(&mut b_events, |e| {
        matches!(e, PeerEvent::ChatReceived { payload, .. } if payload == "x")
    })
    .await;

    a.propose_edit(0, "y").await.unwrap();
    expect_event(&mut b_events, is_vote_request).await;
    outsider.send_to(a.endpoint(), "/GO").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.phase().await.unwrap(), EditPhase::Proposed);

    b.vote(Vote::Approve).await.unwrap();
    expect_event(&mut a_events, |e| matches!(e, PeerEvent::EditCommitted { .. })).await;
    assert_eq!(a.log_snapshot().await, vec!["y".to_string()]);
}

#[actix_rt::test]
async fn test_longest_payload_keeps_logs_in_sync() {
    let (server, observer) = spawn_observed_server().await;
    let network = MemoryNetwork::new();

    let (a, mut a_events) = join(&network, peer_config(server)).await;
    let (b, mut b_events) = join(&network, peer_config(server)).await;
    let longest = max_payload_len(PeerConfig::default().max_frame_len);

    let chat = "c".repeat(longest);
    assert_eq!(a.chat(&chat).await.unwrap(), 0);
    expect_event(&mut b_events, |e| matches!(e, PeerEvent::ChatReceived { .. })).await;
    expect_records(&observer, ObservationKind::Chat, 1).await;

    let edit = "e".repeat(longest);
    a.propose_edit(0, &edit).await.unwrap();
    expect_event(&mut b_events, is_vote_request).await;
    b.vote(Vote::Approve).await.unwrap();

    expect_event(&mut a_events, |e| matches!(e, PeerEvent::EditCommitted { .. })).await;
    expect_event(&mut b_events, |e| matches!(e, PeerEvent::EditApplied { .. })).await;
    assert_eq!(a.log_snapshot().await, vec![edit.clone()]);
    assert_eq!(b.log_snapshot().await, vec![edit]);
    expect_records(&observer, ObservationKind::Edit, 1).await;
}

#[actix_rt::test]
async fn test_oversize_payload_has_no_side_effects() {
    let server = spawn_server().await;
    let network = MemoryNetwork::new();

    let (a, _a_events) = join(&network, peer_config(server)).await;
    let (b, mut b_events) = join(&network, peer_config(server)).await;
    let oversize = "x".repeat(max_payload_len(PeerConfig::default().max_frame_len) + 1);

    assert!(matches!(
        a.chat(&oversize).await,
        Err(ChatError::InvalidPayload(_))
    ));
    assert!(a.log_snapshot().await.is_empty());

    assert_eq!(a.chat("short").await.unwrap(), 0);
    expect_event(&mut b_events, |e| matches!(e, PeerEvent::ChatReceived { .. })).await;

    assert!(matches!(
        a.propose_edit(0, &oversize).await,
        Err(ChatError::InvalidPayload(_))
    ));
    assert_eq!(a.phase().await.unwrap(), EditPhase::Idle);

    // The coordinator is still free for the next proposal
    a.propose_edit(0, "fits").await.unwrap();
    expect_event(&mut b_events, is_vote_request).await;
    b.vote(Vote::Approve).await.unwrap();
    expect_event(&mut b_events, |e| matches!(e, PeerEvent::EditApplied { .. })).await;
    assert_eq!(b.log_snapshot().await, vec!["fits".to_string()]);
}

#[actix_rt::test]
async fn test_multiline_datagram_is_discarded() {
    let server = spawn_server().await;
    let network = MemoryNetwork::new();
    let (b, mut b_events) = join(&network, peer_config(server)).await;

    let config = peer_config(server);
    let sender = network
        .bind(
            PeerEndpoint::derive(config.host, config.port_base, 41).unwrap(),
            config.max_frame_len,
        )
        .unwrap();

    sender
        .send_to(b.endpoint(), "line one\nline two")
        .await
        .unwrap();
    sender
        .send_to(b.endpoint(), "x\ny ~overwrite 0")
        .await
        .unwrap();
    sender.send_to(b.endpoint(), "after").await.unwrap();

    let event = expect_event(&mut b_events, |e| matches!(e, PeerEvent::ChatReceived { .. })).await;
    assert!(matches!(
        event,
        PeerEvent::ChatReceived { index: 0, ref payload, .. } if payload == "after"
    ));
    assert_eq!(b.log_snapshot().await, vec!["after".to_string()]);
}

#[actix_rt::test]
async fn test_lost_report_does_not_stop_commit() {
    let server = spawn_server().await;
    let network = MemoryNetwork::new();

    let (a, mut a_events) = join_with(&network, peer_config(server), |link| {
        Arc::new(LosesReports(link)) as Arc<dyn ServerLink>
    })
    .await;
    let (b, mut b_events) = join(&network, peer_config(server)).await;

    assert_eq!(a.chat("hello").await.unwrap(), 0);
    expect_event(&mut b_events, |e| matches!(e, PeerEvent::ChatReceived { .. })).await;

    a.propose_edit(0, "edited").await.unwrap();
    expect_event(&mut b_events, is_vote_request).await;
    b.vote(Vote::Approve).await.unwrap();

    expect_event(&mut a_events, |e| matches!(e, PeerEvent::EditCommitted { .. })).await;
    expect_event(&mut b_events, |e| matches!(e, PeerEvent::EditApplied { .. })).await;
    for peer in [&a, &b] {
        assert_eq!(peer.log_snapshot().await, vec!["edited".to_string()]);
    }
}

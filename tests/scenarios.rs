//! Multi-node integration tests driving real loopback TCP links between
//! in-process nodes, the way a small real cluster would run. Each node
//! gets its own `Coordinator`, its own temp-dir-backed `FileWal`, and its
//! own background task pumping link events -- nothing here talks to the
//! coordinator directly except through the same `submit`/event-loop path
//! `main.rs` uses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gsnsync::cluster::Topology;
use gsnsync::config::EngineConfig;
use gsnsync::coordinator::Coordinator;
use gsnsync::executor::{EchoExecutor, FileWal, Wal};
use gsnsync::ops::OpOutcome;
use gsnsync::peer::{self, LinkEvent};
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};

/// A running node: its coordinator, reachable from the test via a command
/// channel so multiple tasks can issue `submit` calls without fighting
/// over `&mut Coordinator`.
struct Node {
    submit_tx: mpsc::Sender<Cmd>,
    _wal_dir: TempDir,
    _state_dir: TempDir,
}

enum Cmd {
    Submit(Vec<u8>, tokio::sync::oneshot::Sender<gsnsync::Result<OpOutcome>>),
    IsLeader(tokio::sync::oneshot::Sender<bool>),
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Spin up `n` nodes wired to each other over loopback TCP, each with its
/// own coordinator event loop, and wait for an election to settle.
async fn spawn_cluster(n: u8) -> Vec<Node> {
    let ports: Vec<u16> = (0..n).map(|_| free_port()).collect();
    let replica: Vec<String> = ports.iter().map(|p| format!("127.0.0.1:{p}")).collect();

    let mut nodes = Vec::new();

    for i in 0..n {
        let wal_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();

        let toml = format!(
            "[node]\ndata_dir = \"{}\"\n\n[cluster]\nreplica = {:?}\nlocal = \"{}\"\nread_timeout_secs = 1.0\nwrite_timeout_secs = 1.0\nconnect_timeout_secs = 1.0\nreconnect_timeout_secs = 0.2\nping_timeout_secs = 1.0\nelection_timeout_secs = 0.3\noperation_timeout_secs = 1.0\nslow_host_timeout_secs = 2.0\n",
            wal_dir.path().display(),
            replica,
            replica[i as usize],
        );
        let config = Arc::new(EngineConfig::from_str(&toml).unwrap());
        let topology = Topology::from_config(&config);

        let wal: Arc<dyn Wal> = Arc::new(FileWal::open(wal_dir.path().join("wal"), config.wal.clone()).await.unwrap());
        let executor = Arc::new(EchoExecutor::default());

        let running_crc = Arc::new(AtomicU32::new(0));
        let coordinator = Arc::new(Mutex::new(Coordinator::new(
            config.clone(),
            topology.clone(),
            wal.clone(),
            executor,
            0,
            running_crc.clone(),
        )));

        let (events_tx, mut events_rx) = mpsc::channel::<LinkEvent>(256);
        let mut accept_routes = HashMap::new();

        for host in topology.peers() {
            let (accept_tx, accept_rx) = mpsc::channel(4);
            accept_routes.insert(host.host_id, accept_tx);

            let wal_for_gsn = wal.clone();
            let running_crc_for_hello = running_crc.clone();
            let handle = peer::link::spawn(
                topology.local_id,
                host.host_id,
                host.address.clone(),
                config.clone(),
                move || wal_for_gsn.durable_gsn(),
                move || running_crc_for_hello.load(Ordering::SeqCst),
                events_tx.clone(),
                Some(accept_rx),
            );
            coordinator.lock().await.register_link(handle);
        }

        let bind_address = replica[i as usize].clone();
        let read_timeout = config.read_timeout();
        tokio::spawn(async move {
            let _ = peer::listener::run(bind_address, read_timeout, accept_routes).await;
        });

        let (submit_tx, mut submit_rx) = mpsc::channel::<Cmd>(32);
        let coordinator_for_loop = coordinator.clone();
        tokio::spawn(async move {
            let mut timeout_tick = tokio::time::interval(Duration::from_millis(50));
            loop {
                tokio::select! {
                    Some(event) = events_rx.recv() => {
                        let _ = coordinator_for_loop.lock().await.handle_link_event(event).await;
                    }
                    _ = timeout_tick.tick() => {
                        let _ = coordinator_for_loop.lock().await.poll_timeouts().await;
                    }
                    Some(cmd) = submit_rx.recv() => {
                        match cmd {
                            Cmd::Submit(payload, reply) => {
                                let result = coordinator_for_loop.lock().await.submit(payload).await;
                                let _ = reply.send(result);
                            }
                            Cmd::IsLeader(reply) => {
                                let is_leader = coordinator_for_loop.lock().await.is_leader();
                                let _ = reply.send(is_leader);
                            }
                        }
                    }
                }
            }
        });

        nodes.push(Node {
            submit_tx,
            _wal_dir: wal_dir,
            _state_dir: state_dir,
        });
    }

    // Give every pair of nodes time to link up and run an election.
    tokio::time::sleep(Duration::from_millis(800)).await;
    nodes
}

async fn submit(node: &Node, payload: &[u8]) -> gsnsync::Result<OpOutcome> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    node.submit_tx.send(Cmd::Submit(payload.to_vec(), tx)).await.unwrap();
    rx.await.unwrap()
}

async fn is_leader(node: &Node) -> bool {
    let (tx, rx) = tokio::sync::oneshot::channel();
    node.submit_tx.send(Cmd::IsLeader(tx)).await.unwrap();
    rx.await.unwrap()
}

/// S1. Three-node happy write: a client write submitted on the elected
/// leader commits once a majority (including the leader) has it durably
/// logged.
#[tokio::test]
async fn happy_write_commits_on_quorum() {
    let nodes = spawn_cluster(3).await;

    let mut leader_idx = None;
    for (i, node) in nodes.iter().enumerate() {
        if is_leader(node).await {
            leader_idx = Some(i);
        }
    }
    let leader_idx = leader_idx.expect("cluster must elect a leader");

    let outcome = submit(&nodes[leader_idx], b"INSERT k=1,v=10").await.unwrap();
    assert!(matches!(outcome, OpOutcome::Committed));
}

/// S2. Follower-originated write: a node that isn't leader proxies its
/// write to the leader and still observes it committed.
#[tokio::test]
async fn follower_originated_write_commits_via_proxy() {
    let nodes = spawn_cluster(3).await;

    let mut follower_idx = None;
    for (i, node) in nodes.iter().enumerate() {
        if !is_leader(node).await {
            follower_idx = Some(i);
            break;
        }
    }
    let follower_idx = follower_idx.expect("cluster must have a non-leader node");

    let outcome = submit(&nodes[follower_idx], b"INSERT k=2,v=20").await.unwrap();
    assert!(matches!(outcome, OpOutcome::Committed));
}

/// A two-node cluster still reaches the trivial majority of one: the
/// leader alone is `2*1 > 2`... false, so it must actually hear from its
/// single peer before committing.
#[tokio::test]
async fn two_node_cluster_requires_the_peer_vote() {
    let nodes = spawn_cluster(2).await;

    let mut leader_idx = None;
    for (i, node) in nodes.iter().enumerate() {
        if is_leader(node).await {
            leader_idx = Some(i);
        }
    }
    let leader_idx = leader_idx.expect("cluster must elect a leader");

    let outcome = submit(&nodes[leader_idx], b"INSERT k=3,v=30").await.unwrap();
    assert!(matches!(outcome, OpOutcome::Committed));
}

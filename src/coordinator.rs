//! C5: the commit coordinator.
//!
//! Runs the `init -> accept -> wal -> submit -> yield` state machine for
//! every operation, playing leader, follower, and leader-as-proxy roles
//! depending on where an operation originates and whether this node
//! currently holds leadership.
//!
//! Wire shape: the leader broadcasts `body` to every follower. Each
//! follower writes it to its own WAL immediately (this is the durability
//! point a quorum is waiting on) and replies with `submit(gsn)` -- a vote,
//! not yet a finalization. Once the leader holds a majority of votes
//! (itself included) it applies the write locally, then broadcasts
//! `submit(gsn)` a second time, now as the finalization order: every
//! follower holding that GSN executes it and yields. The same message
//! carries both meanings; which one applies is decided by role, not by
//! message shape, exactly as a follower only ever receives a leader's
//! vote-collection traffic once it is itself promoted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::cluster::{LinkState, PeerState, Topology};
use crate::codec::{Body, Message, ProxyAccept, ProxyReject, ProxyRequest, ProxySubmit, Reject, Submit};
use crate::config::EngineConfig;
use crate::election::{Election, ElectionAction};
use crate::error::{Error, Result};
use crate::executor::{RequestExecutor, Wal};
use crate::ops::{self, OpOutcome, OpStatus, Operation, Origin, Registry};
use crate::peer::{LinkEvent, PeerHandle};
use crate::recovery;
use crate::types::{ConflictKey, Gsn, HostId, OpCrc};

/// An operation we proxied to the leader and are waiting to hear back on.
/// `leader`/`conflict_key` are kept so the admission this node took out
/// locally (C3, `Origin::Slave`) before ever sending the request can be
/// released no matter how the proxy is resolved.
struct PendingProxy {
    leader: HostId,
    conflict_key: ConflictKey,
    waker: oneshot::Sender<Result<OpOutcome>>,
}

pub struct Coordinator {
    local_id: HostId,
    topology: Topology,
    config: Arc<EngineConfig>,
    wal: Arc<dyn Wal>,
    executor: Arc<dyn RequestExecutor>,

    peers: HashMap<HostId, PeerState>,
    links: HashMap<HostId, PeerHandle>,

    election: Election,
    registry: Registry,
    next_gsn: Gsn,

    /// Running CRC over the sequence of bodies this node has committed,
    /// chained (each update folds in the previous value) so it only agrees
    /// with a peer's when the whole committed history agrees, not just the
    /// last body. Shared with the peer links so their `hello` reports it.
    running_crc: Arc<AtomicU32>,

    /// Requests proxied to the leader before it has assigned a GSN, in
    /// send order -- `proxy_accept` correlates against the front of this
    /// queue, then moves the waker into `proxied` keyed by the real GSN.
    awaiting_proxy_accept: std::collections::VecDeque<PendingProxy>,
    proxied: HashMap<Gsn, PendingProxy>,

    /// Wakers for operations this node itself originated as leader, keyed
    /// by the GSN the operation was assigned.
    local_wakers: HashMap<Gsn, oneshot::Sender<Result<OpOutcome>>>,
}

impl Coordinator {
    pub fn new(
        config: Arc<EngineConfig>,
        topology: Topology,
        wal: Arc<dyn Wal>,
        executor: Arc<dyn RequestExecutor>,
        initial_gsn: Gsn,
        running_crc: Arc<AtomicU32>,
    ) -> Self {
        let num_hosts = topology.num_hosts();
        let local_id = topology.local_id;
        let peers = topology
            .peers()
            .map(|h| (h.host_id, PeerState::new(h.host_id)))
            .collect();

        Self {
            local_id,
            topology,
            config,
            wal,
            executor,
            peers,
            links: HashMap::new(),
            election: Election::new(local_id, num_hosts),
            registry: Registry::new(),
            next_gsn: initial_gsn + 1,
            running_crc,
            awaiting_proxy_accept: std::collections::VecDeque::new(),
            proxied: HashMap::new(),
            local_wakers: HashMap::new(),
        }
    }

    pub fn register_link(&mut self, handle: PeerHandle) {
        self.links.insert(handle.host_id, handle);
    }

    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    fn num_hosts(&self) -> usize {
        self.topology.num_hosts()
    }

    fn broadcast(&self, message: Message) {
        for handle in self.links.values() {
            handle.send(message.clone());
        }
    }

    fn send_to(&self, host_id: HostId, message: Message) {
        if let Some(handle) = self.links.get(&host_id) {
            handle.send(message);
        }
    }

    fn current_crc(&self) -> OpCrc {
        self.running_crc.load(Ordering::SeqCst)
    }

    /// Fold a just-committed body into the running CRC. Chained on the
    /// previous value so divergence earlier in the log still shows up even
    /// if the two sides happen to commit an identical body next.
    fn record_commit_crc(&self, payload: &[u8]) {
        let prev = self.running_crc.load(Ordering::SeqCst);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&prev.to_be_bytes());
        hasher.update(payload);
        self.running_crc.store(hasher.finalize(), Ordering::SeqCst);
    }

    // ---- Local origination ------------------------------------------------

    /// Originate a write. If this node is the leader, runs the leader path
    /// directly; otherwise proxies the request to the current leader and
    /// waits for its resolution.
    pub async fn submit(&mut self, payload: Vec<u8>) -> Result<OpOutcome> {
        if !self.config.cluster.enable {
            self.wal.write(self.next_gsn, self.local_id, payload.clone()).await?;
            self.next_gsn += 1;
            self.record_commit_crc(&payload);
            return Ok(OpOutcome::Committed);
        }

        if self.is_leader() {
            let (tx, rx) = oneshot::channel();
            self.begin_leader_operation(self.local_id, payload, Some(tx)).await?;
            rx.await.map_err(|_| Error::Cancelled)?
        } else {
            let leader = self.election.current_leader.ok_or(Error::NoLeader)?;
            let conflict_key = self.executor.conflict_key(&payload)?;
            // Spec §4.5 follower path step 1: admit locally, via C3,
            // before the request ever leaves this node -- a conflict here
            // rolls back immediately instead of round-tripping the leader.
            self.admit_local_proxy(leader, &conflict_key)?;
            let (tx, rx) = oneshot::channel();
            self.awaiting_proxy_accept.push_back(PendingProxy {
                leader,
                conflict_key: conflict_key.clone(),
                waker: tx,
            });
            self.send_to(
                leader,
                Message::ProxyRequest(ProxyRequest {
                    conflict_key,
                    payload,
                }),
            );
            rx.await.map_err(|_| Error::Cancelled)?
        }
    }

    fn admit_local_proxy(&mut self, leader: HostId, key: &ConflictKey) -> Result<()> {
        if let Some(peer) = self.peers.get_mut(&leader) {
            ops::try_admit(&mut peer.active_ops, key, Origin::Slave)
        } else {
            Ok(())
        }
    }

    fn release_local_proxy(&mut self, leader: HostId, key: &ConflictKey) {
        if let Some(peer) = self.peers.get_mut(&leader) {
            ops::release(&mut peer.active_ops, key, Origin::Slave);
        }
    }

    /// Leader path: admit, assign a GSN, write locally, and broadcast the
    /// body to every follower. `waker` is `Some` only when the local node
    /// itself originated the write; a proxied request has no local waker
    /// (its caller is answered with `proxy_accept`/`proxy_submit` instead).
    async fn begin_leader_operation(
        &mut self,
        originator_id: HostId,
        payload: Vec<u8>,
        waker: Option<oneshot::Sender<Result<OpOutcome>>>,
    ) -> Result<()> {
        let conflict_key = self.executor.conflict_key(&payload)?;
        let origin = if originator_id == self.local_id {
            Origin::Leader
        } else {
            Origin::Slave
        };
        self.admit_on_all_peers(&conflict_key, origin)?;

        let gsn = self.next_gsn;
        self.next_gsn += 1;

        self.wal.write(gsn, self.local_id, payload.clone()).await?;

        let deadline = Instant::now() + self.config.operation_timeout();
        let (internal_tx, internal_rx) = oneshot::channel();
        let mut op = Operation::new(gsn, originator_id, conflict_key.clone(), payload.clone(), deadline, internal_tx);
        op.status = OpStatus::Wal;
        op.accepted.insert(self.local_id);
        self.registry.insert(op);
        // Discard the internal oneshot's receiver: resolution for
        // leader-originated ops happens synchronously inside this
        // coordinator via `waker`/`proxied`, not through `Operation::resolve`.
        drop(internal_rx);

        if let Some(waker) = waker {
            self.local_wakers.insert(gsn, waker);
        } else if originator_id != self.local_id {
            // Proxied: reply with proxy_accept now, finalize later.
            self.send_to(originator_id, Message::ProxyAccept(ProxyAccept { gsn }));
        }

        self.broadcast(Message::Body(Body {
            gsn,
            conflict_key,
            payload,
        }));

        self.maybe_finalize(gsn).await?;
        Ok(())
    }

    fn admit_on_all_peers(&mut self, key: &ConflictKey, origin: Origin) -> Result<()> {
        let mut admitted: Vec<HostId> = Vec::new();
        for (host_id, peer) in self.peers.iter_mut() {
            match ops::try_admit(&mut peer.active_ops, key, origin) {
                Ok(()) => admitted.push(*host_id),
                Err(e) => {
                    for host_id in admitted {
                        if let Some(peer) = self.peers.get_mut(&host_id) {
                            ops::release(&mut peer.active_ops, key, origin);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn release_on_all_peers(&mut self, key: &ConflictKey, origin: Origin) {
        for peer in self.peers.values_mut() {
            ops::release(&mut peer.active_ops, key, origin);
        }
    }

    // ---- Inbound dispatch --------------------------------------------------

    pub async fn handle_link_event(&mut self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::Up {
                host_id,
                peer_gsn,
                peer_last_op_crc,
            } => {
                if let Some(peer) = self.peers.get_mut(&host_id) {
                    peer.connected = LinkState::Connected;
                    peer.gsn = peer_gsn;
                    peer.last_op_crc = peer_last_op_crc;
                }
                let became_leader = self.run_election().await?;
                // Spec §4.6 step 4: a peer reconnecting to an already
                // standing leader may still be behind and needs its tail
                // replayed. `BecomeLeader` already recovers every up peer
                // itself, so skip double-recovering the one that triggered it.
                if self.is_leader() && !became_leader {
                    let local_crc = self.current_crc();
                    self.recover_peer_if_needed(host_id, local_crc).await;
                }
            }
            LinkEvent::Down(host_id) => {
                if let Some(peer) = self.peers.get_mut(&host_id) {
                    peer.connected = LinkState::Disconnected;
                    peer.op_queue.clear();
                }
                if self.election.current_leader == Some(host_id) {
                    self.handle_loss_of_leader().await?;
                }
                self.run_election().await?;
            }
            LinkEvent::Message(from, message) => self.handle_message(from, message).await?,
        }
        Ok(())
    }

    /// Re-run candidate selection after a connectivity change. Returns
    /// whether this call made the local node leader.
    async fn run_election(&mut self) -> Result<bool> {
        let local_gsn = self.wal.durable_gsn();
        let up_peers: Vec<(HostId, Gsn)> = self
            .peers
            .values()
            .filter(|p| p.is_up())
            .map(|p| (p.host_id, p.gsn))
            .collect();

        let action = self.election.on_connectivity_change(local_gsn, &up_peers);
        let became_leader = matches!(action, ElectionAction::BecomeLeader);
        self.apply_election_action(action).await?;
        Ok(became_leader)
    }

    async fn apply_election_action(&mut self, action: ElectionAction) -> Result<()> {
        match action {
            ElectionAction::BroadcastPromise(promise) => {
                self.broadcast(Message::LeaderPromise(promise));
            }
            ElectionAction::SendAccept(host_id) => {
                self.send_to(
                    host_id,
                    Message::LeaderAccept(crate::codec::LeaderAccept {
                        voter_id: self.local_id,
                    }),
                );
            }
            ElectionAction::SendReject(host_id, reject) => {
                self.send_to(host_id, Message::LeaderReject(reject));
            }
            ElectionAction::BecomeLeader => {
                // Invariant 4 / testable property 5: the new leader must
                // not reuse a GSN anyone -- itself included -- has already
                // committed. A node that spent time as a follower only
                // advances its own WAL, never `next_gsn`, so it has to be
                // reconciled against both here.
                let best_up_peer_gsn = self
                    .peers
                    .values()
                    .filter(|p| p.is_up())
                    .map(|p| p.gsn)
                    .max()
                    .unwrap_or(0);
                let durable_gsn = self.wal.durable_gsn();
                self.next_gsn = durable_gsn.max(best_up_peer_gsn) + 1;

                self.broadcast(Message::LeaderSubmit(crate::codec::LeaderSubmit {
                    leader_id: self.local_id,
                    gsn: durable_gsn,
                }));

                // Spec §4.7: recovery runs to completion here, synchronously
                // within this single coordinator task, before control
                // returns to any caller that might originate a new write --
                // so no separate "recovery in progress" flag is needed to
                // keep writes from racing ahead of a pending replay.
                self.recover_all_lagging_peers().await;
            }
            ElectionAction::FollowLeader(_) | ElectionAction::None => {}
        }
        Ok(())
    }

    /// Replay a WAL tail to every up peer that is behind, now that this
    /// node has just become leader.
    async fn recover_all_lagging_peers(&mut self) {
        let local_crc = self.current_crc();
        let host_ids: Vec<HostId> = self.peers.iter().filter(|(_, p)| p.is_up()).map(|(id, _)| *id).collect();
        for host_id in host_ids {
            self.recover_peer_if_needed(host_id, local_crc).await;
        }
    }

    /// C7: compare one peer's reported (gsn, crc) against ours and replay
    /// its tail if it's behind. A diverged peer has the link torn down
    /// instead -- there is nothing safe to replay into it.
    async fn recover_peer_if_needed(&mut self, host_id: HostId, local_crc: OpCrc) {
        let (peer_gsn, peer_crc) = match self.peers.get(&host_id) {
            Some(peer) => (peer.gsn, peer.last_op_crc),
            None => return,
        };
        let Some(link) = self.links.get(&host_id) else {
            return;
        };

        if let Err(e) = recovery::recover_peer(&self.wal, link, local_crc, host_id, peer_gsn, peer_crc).await {
            tracing::warn!(host_id, error = %e, "peer diverged during recovery, tearing down link");
            if let Some(peer) = self.peers.get_mut(&host_id) {
                peer.connected = LinkState::Disconnected;
            }
        }
    }

    async fn handle_message(&mut self, from: HostId, message: Message) -> Result<()> {
        match message {
            Message::Hello(_) => {}
            Message::Ping(ping) => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.gsn = peer.gsn.max(ping.gsn);
                }
            }
            Message::LeaderPromise(p) => {
                let local_gsn = self.wal.durable_gsn();
                let action = self.election.on_leader_promise(from, p.candidate_id, p.gsn, local_gsn);
                self.apply_election_action(action).await?;
            }
            Message::LeaderAccept(_) => {
                let action = self.election.on_leader_accept(from);
                self.apply_election_action(action).await?;
            }
            Message::LeaderReject(r) => {
                let local_gsn = self.wal.durable_gsn();
                let action = self.election.on_leader_reject(r.best_host_id, r.best_gsn, local_gsn);
                self.apply_election_action(action).await?;
            }
            Message::LeaderSubmit(s) => {
                let action = self.election.on_leader_submit(s.leader_id);
                self.apply_election_action(action).await?;
            }
            Message::Body(body) => self.handle_body(from, body).await?,
            Message::Submit(submit) => self.handle_submit(from, submit).await?,
            Message::Reject(reject) => self.handle_reject(from, reject).await?,
            Message::ProxyRequest(req) => self.handle_proxy_request(from, req).await?,
            Message::ProxyAccept(a) => self.handle_proxy_accept(a),
            Message::ProxySubmit(s) => self.handle_proxy_submit(s),
            Message::ProxyReject(r) => self.handle_proxy_reject(r),
            Message::ProxyJoin(_) => {}
        }
        Ok(())
    }

    // ---- Follower path ------------------------------------------------------

    /// A follower receiving `body` writes it to its own WAL right away --
    /// that write is the durability the leader's quorum is waiting on --
    /// then votes by echoing `submit(gsn)` back. Execution is deferred
    /// until the leader's finalizing `submit` arrives.
    async fn handle_body(&mut self, from: HostId, body: Body) -> Result<()> {
        if let Err(e) = self.admit_follower(&body.conflict_key) {
            self.send_to(
                from,
                Message::Reject(Reject {
                    gsn: body.gsn,
                    reason: e.to_string(),
                }),
            );
            return Ok(());
        }

        self.wal.write(body.gsn, from, body.payload.clone()).await?;

        let (tx, _rx) = oneshot::channel();
        let deadline = Instant::now() + self.config.operation_timeout();
        let mut op = Operation::new(body.gsn, from, body.conflict_key, body.payload, deadline, tx);
        op.status = OpStatus::Wal;
        self.registry.insert(op);

        self.send_to(from, Message::Submit(Submit { gsn: body.gsn }));
        Ok(())
    }

    fn admit_follower(&mut self, key: &ConflictKey) -> Result<()> {
        // A follower only tracks admission against its own link's table --
        // the single active-op table it keeps, for its leader.
        if let Some(leader_id) = self.election.current_leader {
            if let Some(peer) = self.peers.get_mut(&leader_id) {
                return ops::try_admit(&mut peer.active_ops, key, Origin::Leader);
            }
        }
        Ok(())
    }

    /// Role-dependent: a leader receiving `submit` is being voted on by a
    /// follower; a follower receiving `submit` is being told by its leader
    /// to finalize an operation it already wrote to WAL on `body`.
    async fn handle_submit(&mut self, from: HostId, submit: Submit) -> Result<()> {
        if self.is_leader() {
            self.record_vote(from, submit.gsn).await
        } else if self.election.current_leader == Some(from) {
            self.finalize_follower(submit.gsn).await
        } else {
            Ok(())
        }
    }

    async fn record_vote(&mut self, from: HostId, gsn: Gsn) -> Result<()> {
        if let Some(op) = self.registry.get_mut(gsn) {
            op.accepted.insert(from);
        } else {
            return Ok(());
        }
        self.maybe_finalize(gsn).await
    }

    /// Once a quorum of votes (self included) has been collected, apply the
    /// write, finalize, and tell everyone to do the same.
    async fn maybe_finalize(&mut self, gsn: Gsn) -> Result<()> {
        let ready = match self.registry.get(gsn) {
            Some(op) => crate::types::is_majority(op.accepted.len(), self.num_hosts()) && op.status != OpStatus::Yield,
            None => false,
        };
        if !ready {
            return Ok(());
        }

        let (conflict_key, payload, originator_id) = match self.registry.get(gsn) {
            Some(op) => (op.conflict_key.clone(), op.body.clone(), op.originator_id),
            None => return Ok(()),
        };

        let origin = if originator_id == self.local_id {
            Origin::Leader
        } else {
            Origin::Slave
        };

        self.executor.execute(&payload)?;
        self.record_commit_crc(&payload);
        if let Some(op) = self.registry.get_mut(gsn) {
            op.status = OpStatus::Yield;
        }
        self.release_on_all_peers(&conflict_key, origin);
        self.registry.remove(gsn);

        self.broadcast(Message::Submit(Submit { gsn }));

        if let Some(waker) = self.local_wakers.remove(&gsn) {
            let _ = waker.send(Ok(OpOutcome::Committed));
        } else if originator_id != self.local_id {
            self.send_to(originator_id, Message::ProxySubmit(ProxySubmit { gsn }));
        }
        Ok(())
    }

    async fn finalize_follower(&mut self, gsn: Gsn) -> Result<()> {
        let (conflict_key, payload) = match self.registry.get(gsn) {
            Some(op) => (op.conflict_key.clone(), op.body.clone()),
            None => return Ok(()),
        };
        self.executor.execute(&payload)?;
        self.record_commit_crc(&payload);
        if let Some(op) = self.registry.get_mut(gsn) {
            op.status = OpStatus::Yield;
        }
        self.release_follower_admission(&conflict_key);
        self.registry.remove(gsn);
        Ok(())
    }

    fn release_follower_admission(&mut self, key: &ConflictKey) {
        if let Some(leader_id) = self.election.current_leader {
            if let Some(peer) = self.peers.get_mut(&leader_id) {
                ops::release(&mut peer.active_ops, key, Origin::Leader);
            }
        }
    }

    async fn handle_reject(&mut self, _from: HostId, reject: Reject) -> Result<()> {
        if let Some(op) = self.registry.remove(reject.gsn) {
            self.release_follower_admission(&op.conflict_key);
        }
        Ok(())
    }

    // ---- Leader-as-proxy path -----------------------------------------------

    async fn handle_proxy_request(&mut self, from: HostId, req: ProxyRequest) -> Result<()> {
        if !self.is_leader() {
            self.send_to(
                from,
                Message::ProxyReject(ProxyReject {
                    gsn: 0,
                    reason: "not leader".into(),
                }),
            );
            return Ok(());
        }
        // No GSN has been assigned yet at this point, so a conflict here
        // is reported with the same `gsn: 0` sentinel as "not leader" --
        // `handle_proxy_reject` on the follower side falls back to
        // queue-order correlation for both.
        match self.begin_leader_operation(from, req.payload, None).await {
            Ok(()) => Ok(()),
            Err(e @ Error::Conflict(_)) => {
                self.send_to(
                    from,
                    Message::ProxyReject(ProxyReject {
                        gsn: 0,
                        reason: e.to_string(),
                    }),
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn handle_proxy_accept(&mut self, accept: ProxyAccept) {
        if let Some(pending) = self.awaiting_proxy_accept.pop_front() {
            self.proxied.insert(accept.gsn, pending);
        }
    }

    fn handle_proxy_submit(&mut self, submit: ProxySubmit) {
        if let Some(pending) = self.proxied.remove(&submit.gsn) {
            self.release_local_proxy(pending.leader, &pending.conflict_key);
            let _ = pending.waker.send(Ok(OpOutcome::Committed));
        }
    }

    /// `reject.gsn` correlates against `proxied` (post-accept) when it's a
    /// real, already-assigned GSN; the `gsn: 0` sentinel used for
    /// pre-assignment rejections never matches a real entry there, so it
    /// falls through to the accept-phase queue, matched in send order per
    /// spec §4.5 step 3.
    fn handle_proxy_reject(&mut self, reject: ProxyReject) {
        if let Some(pending) = self.proxied.remove(&reject.gsn) {
            self.release_local_proxy(pending.leader, &pending.conflict_key);
            let _ = pending.waker.send(Ok(OpOutcome::Rejected(reject.reason)));
            return;
        }
        if let Some(pending) = self.awaiting_proxy_accept.pop_front() {
            self.release_local_proxy(pending.leader, &pending.conflict_key);
            let _ = pending.waker.send(Ok(OpOutcome::Rejected(reject.reason)));
        }
    }

    // ---- Leader: timeouts and rollback --------------------------------------

    pub async fn poll_timeouts(&mut self) -> Result<()> {
        let now = Instant::now();
        let expired: Vec<Gsn> = self.registry.expired(now);
        for gsn in expired {
            self.timeout_operation(gsn).await?;
        }
        Ok(())
    }

    fn origin_of(&self, originator_id: HostId) -> Origin {
        if originator_id == self.local_id {
            Origin::Leader
        } else {
            Origin::Slave
        }
    }

    async fn timeout_operation(&mut self, gsn: Gsn) -> Result<()> {
        if let Some(op) = self.registry.remove(gsn) {
            self.cascade_rollback(&op.conflict_key, gsn).await?;
            let origin = self.origin_of(op.originator_id);
            self.release_on_all_peers(&op.conflict_key, origin);
            self.broadcast(Message::Reject(Reject {
                gsn,
                reason: "operation timed out waiting for quorum".into(),
            }));
            if let Some(waker) = self.local_wakers.remove(&gsn) {
                let _ = waker.send(Err(Error::Timeout(gsn)));
            } else if op.originator_id != self.local_id {
                self.send_to(
                    op.originator_id,
                    Message::ProxyReject(ProxyReject {
                        gsn,
                        reason: "timed out waiting for quorum".into(),
                    }),
                );
            }
        }
        Ok(())
    }

    /// Roll back every later-admitted operation on the same conflict key,
    /// in reverse admission order -- a rejected/timed-out op may have been
    /// blocking ordering guarantees later ops already assumed held.
    async fn cascade_rollback(&mut self, key: &ConflictKey, from_gsn: Gsn) -> Result<()> {
        let mut later = self.registry.later_on_same_key(key, from_gsn);
        later.sort_unstable_by(|a, b| b.cmp(a));
        for gsn in later {
            if let Some(op) = self.registry.remove(gsn) {
                let origin = self.origin_of(op.originator_id);
                self.release_on_all_peers(&op.conflict_key, origin);
                self.broadcast(Message::Reject(Reject {
                    gsn,
                    reason: "rolled back by an earlier conflict".into(),
                }));
                if let Some(waker) = self.local_wakers.remove(&gsn) {
                    let _ = waker.send(Err(Error::Conflict(op.conflict_key.clone())));
                } else if op.originator_id != self.local_id {
                    self.send_to(
                        op.originator_id,
                        Message::ProxyReject(ProxyReject {
                            gsn,
                            reason: "rolled back by an earlier conflict".into(),
                        }),
                    );
                }
            }
        }
        Ok(())
    }

    /// The current leader went down. Operations already written locally to
    /// our own WAL (`Wal` status or later) are durable enough to commit;
    /// anything earlier never reached a decision and must roll back.
    async fn handle_loss_of_leader(&mut self) -> Result<()> {
        let gsns: Vec<Gsn> = self.registry.gsns_ascending().collect();
        for gsn in gsns {
            let (status, conflict_key, payload) = match self.registry.get(gsn) {
                Some(op) => (op.status, op.conflict_key.clone(), op.body.clone()),
                None => continue,
            };

            match status {
                OpStatus::Wal | OpStatus::Submit => {
                    self.executor.execute(&payload)?;
                    self.record_commit_crc(&payload);
                    if self.registry.remove(gsn).is_some() {
                        self.release_follower_admission(&conflict_key);
                    }
                }
                _ => {
                    if self.registry.remove(gsn).is_some() {
                        self.release_follower_admission(&conflict_key);
                    }
                }
            }
        }

        while let Some(pending) = self.awaiting_proxy_accept.pop_front() {
            self.release_local_proxy(pending.leader, &pending.conflict_key);
            let _ = pending.waker.send(Err(Error::NoLeader));
        }
        let orphaned: Vec<PendingProxy> = self.proxied.drain().map(|(_, pending)| pending).collect();
        for pending in orphaned {
            self.release_local_proxy(pending.leader, &pending.conflict_key);
            let _ = pending.waker.send(Err(Error::NoLeader));
        }
        for (_, waker) in self.local_wakers.drain() {
            let _ = waker.send(Err(Error::NoLeader));
        }

        Ok(())
    }

    /// Election grace period on startup, per the configured
    /// `election_timeout` -- gives every peer a chance to link up before
    /// the first election runs, so a node restarting alone doesn't win by
    /// default against peers it simply hasn't connected to yet.
    pub fn election_grace_period(&self) -> Duration {
        self.config.election_timeout()
    }
}

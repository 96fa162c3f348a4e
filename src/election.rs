//! C6: leader election.
//!
//! Triggered by a connectivity change (a peer link goes up or down), not by
//! a fixed heartbeat timeout. The candidate is whichever up host -- self
//! included -- has the highest `(gsn, host_id)` pair: GSN is the primary
//! key because it is the only thing that matters for not losing committed
//! data, and `host_id` only breaks ties between equally-caught-up hosts.
//! A majority of `leader_accept` replies makes the promise stick; anyone
//! who sees a better candidate replies `leader_reject(best_host_id,
//! best_gsn)` to redirect the election instead of just refusing.

use std::collections::HashSet;

use crate::codec::{LeaderPromise, LeaderReject};
use crate::types::{is_majority, Gsn, HostId};

/// What the coordinator should do as a result of feeding the election
/// state machine an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionAction {
    /// Broadcast this promise to every up peer.
    BroadcastPromise(LeaderPromise),
    /// Send `leader_accept` to this host.
    SendAccept(HostId),
    /// Send this rejection, redirecting the election to a better candidate.
    SendReject(HostId, LeaderReject),
    /// Majority reached: broadcast `leader_submit` and become leader.
    BecomeLeader,
    /// Another host became leader.
    FollowLeader(HostId),
    /// Nothing to do.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Candidate,
    Following,
}

pub struct Election {
    local_id: HostId,
    num_hosts: usize,
    phase: Phase,
    /// The candidate this node currently supports (self or someone else).
    supported_candidate: Option<(HostId, Gsn)>,
    accepts: HashSet<HostId>,
    pub current_leader: Option<HostId>,
}

impl Election {
    pub fn new(local_id: HostId, num_hosts: usize) -> Self {
        Self {
            local_id,
            num_hosts,
            phase: Phase::Idle,
            supported_candidate: None,
            accepts: HashSet::new(),
            current_leader: None,
        }
    }

    /// Re-run candidate selection after a connectivity change. `up_peers`
    /// must include every peer currently link-up, each with its last known
    /// GSN; the local GSN is `local_gsn`.
    pub fn on_connectivity_change(
        &mut self,
        local_gsn: Gsn,
        up_peers: &[(HostId, Gsn)],
    ) -> ElectionAction {
        self.current_leader = None;
        self.accepts.clear();

        let mut best = (self.local_id, local_gsn);
        for &(host_id, gsn) in up_peers {
            if (gsn, host_id) > (best.1, best.0) {
                best = (host_id, gsn);
            }
        }

        self.supported_candidate = Some(best);

        if best.0 == self.local_id {
            self.phase = Phase::Candidate;
            self.accepts.insert(self.local_id);
            ElectionAction::BroadcastPromise(LeaderPromise {
                candidate_id: self.local_id,
                gsn: local_gsn,
            })
        } else {
            self.phase = Phase::Idle;
            ElectionAction::None
        }
    }

    /// A `leader_promise` arrived from `from`.
    pub fn on_leader_promise(
        &mut self,
        from: HostId,
        candidate_id: HostId,
        gsn: Gsn,
        local_gsn: Gsn,
    ) -> ElectionAction {
        let incoming = (candidate_id, gsn);
        let current_best = self.supported_candidate.unwrap_or((self.local_id, local_gsn));

        if (incoming.1, incoming.0) > (current_best.1, current_best.0) {
            self.supported_candidate = Some(incoming);
            self.phase = Phase::Idle;
            ElectionAction::SendAccept(from)
        } else if current_best != incoming {
            ElectionAction::SendReject(
                from,
                LeaderReject {
                    best_host_id: current_best.0,
                    best_gsn: current_best.1,
                },
            )
        } else {
            ElectionAction::SendAccept(from)
        }
    }

    /// A `leader_accept` arrived from `from`, supporting our own candidacy.
    pub fn on_leader_accept(&mut self, from: HostId) -> ElectionAction {
        if self.phase != Phase::Candidate {
            return ElectionAction::None;
        }
        self.accepts.insert(from);
        if is_majority(self.accepts.len(), self.num_hosts) {
            self.phase = Phase::Following;
            self.current_leader = Some(self.local_id);
            ElectionAction::BecomeLeader
        } else {
            ElectionAction::None
        }
    }

    /// A `leader_reject` arrived, redirecting us to a better candidate.
    /// Re-promises on the host it names, unless that's us (in which case
    /// we just wait for the rest of the quorum).
    pub fn on_leader_reject(
        &mut self,
        best_host_id: HostId,
        best_gsn: Gsn,
        local_gsn: Gsn,
    ) -> ElectionAction {
        let current_best = self.supported_candidate.unwrap_or((self.local_id, local_gsn));
        if (best_gsn, best_host_id) <= (current_best.1, current_best.0) {
            return ElectionAction::None;
        }

        self.supported_candidate = Some((best_host_id, best_gsn));

        if best_host_id == self.local_id {
            self.phase = Phase::Candidate;
            self.accepts.clear();
            self.accepts.insert(self.local_id);
            ElectionAction::BroadcastPromise(LeaderPromise {
                candidate_id: self.local_id,
                gsn: best_gsn,
            })
        } else {
            self.phase = Phase::Idle;
            ElectionAction::None
        }
    }

    /// A `leader_submit` arrived: `leader_id` has reached majority.
    pub fn on_leader_submit(&mut self, leader_id: HostId) -> ElectionAction {
        self.phase = Phase::Following;
        self.current_leader = Some(leader_id);
        ElectionAction::FollowLeader(leader_id)
    }

    pub fn is_leader(&self) -> bool {
        self.current_leader == Some(self.local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_gsn_becomes_candidate() {
        let mut election = Election::new(0, 3);
        let action = election.on_connectivity_change(5, &[(1, 10), (2, 3)]);
        assert!(matches!(action, ElectionAction::None));
    }

    #[test]
    fn self_is_candidate_when_gsn_is_highest() {
        let mut election = Election::new(0, 3);
        let action = election.on_connectivity_change(10, &[(1, 5), (2, 3)]);
        assert!(matches!(action, ElectionAction::BroadcastPromise(_)));
    }

    #[test]
    fn majority_accept_makes_leader() {
        let mut election = Election::new(0, 3);
        election.on_connectivity_change(10, &[(1, 5), (2, 3)]);
        assert!(matches!(election.on_leader_accept(1), ElectionAction::None));
        assert!(matches!(
            election.on_leader_accept(2),
            ElectionAction::BecomeLeader
        ));
        assert!(election.is_leader());
    }

    #[test]
    fn tie_break_prefers_higher_host_id() {
        let mut election = Election::new(0, 3);
        // Both peers report the same GSN as local; host 2 should win the tie.
        let action = election.on_connectivity_change(5, &[(1, 5), (2, 5)]);
        assert!(matches!(action, ElectionAction::None));
    }

    #[test]
    fn reject_redirects_to_better_candidate() {
        let mut election = Election::new(0, 3);
        election.on_connectivity_change(5, &[(1, 3), (2, 3)]);
        let action = election.on_leader_reject(2, 9, 5);
        assert!(matches!(action, ElectionAction::None));
        assert_eq!(election.supported_candidate, Some((2, 9)));
    }
}

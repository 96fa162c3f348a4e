//! C7: recovery.
//!
//! A peer link that comes back up reports its last known GSN and the CRC
//! of the last operation it committed. If that GSN is behind ours, we
//! owe it a WAL-tail replay; if it's even with ours but the CRC
//! disagrees, the two logs have silently diverged and the link is torn
//! down instead -- there is nothing safe to replay.

use std::sync::Arc;

use crate::codec::{Body, Message};
use crate::error::{Error, Result};
use crate::executor::Wal;
use crate::peer::PeerHandle;
use crate::types::{Gsn, HostId, OpCrc};

/// Outcome of comparing a peer's reported state against our own on link-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Peer is caught up; nothing to do.
    UpToDate,
    /// Peer is behind; replay its tail starting at this GSN.
    ReplayFrom(Gsn),
    /// Peer claims the same GSN as us but a different CRC: the logs have
    /// diverged. The link must be torn down, not replayed into.
    Diverged,
}

/// Decide what, if anything, to replay to a peer that just came up.
pub fn decide(local_gsn: Gsn, local_crc: OpCrc, peer_gsn: Gsn, peer_crc: OpCrc) -> RecoveryDecision {
    if peer_gsn < local_gsn {
        RecoveryDecision::ReplayFrom(peer_gsn + 1)
    } else if peer_gsn == local_gsn && peer_crc != local_crc {
        RecoveryDecision::Diverged
    } else {
        RecoveryDecision::UpToDate
    }
}

/// Replay every row from `from_gsn` onward to `peer`, in ascending GSN
/// order, as `body` messages. This is a cold, operator-relevant path (a
/// peer was down long enough to fall behind), so a full WAL scan to
/// gather the tail is an acceptable cost.
pub async fn replay_tail(wal: &Arc<dyn Wal>, peer: &PeerHandle, from_gsn: Gsn) -> Result<usize> {
    let rows = wal.iterate_from(from_gsn)?;
    let count = rows.len();
    for row in rows {
        peer.send(Message::Body(Body {
            gsn: row.header.gsn,
            conflict_key: Vec::new(),
            payload: row.body,
        }));
    }
    Ok(count)
}

/// Run recovery for a peer that just linked up, given its reported
/// (gsn, crc). Returns an error iff the peer has diverged, in which case
/// the caller must tear the link down rather than send anything further.
pub async fn recover_peer(
    wal: &Arc<dyn Wal>,
    peer: &PeerHandle,
    local_crc: OpCrc,
    peer_host_id: HostId,
    peer_gsn: Gsn,
    peer_crc: OpCrc,
) -> Result<()> {
    let local_gsn = wal.durable_gsn();
    match decide(local_gsn, local_crc, peer_gsn, peer_crc) {
        RecoveryDecision::UpToDate => Ok(()),
        RecoveryDecision::ReplayFrom(from_gsn) => {
            let sent = replay_tail(wal, peer, from_gsn).await?;
            tracing::info!(host_id = peer_host_id, from_gsn, sent, "replayed wal tail to recovering peer");
            Ok(())
        }
        RecoveryDecision::Diverged => Err(Error::Divergence {
            host_id: peer_host_id,
            gsn: local_gsn,
            expected: local_crc,
            got: peer_crc,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_behind_gets_a_replay_decision() {
        assert_eq!(decide(10, 0xAAAA, 4, 0xAAAA), RecoveryDecision::ReplayFrom(5));
    }

    #[test]
    fn matching_gsn_and_crc_is_up_to_date() {
        assert_eq!(decide(10, 0xAAAA, 10, 0xAAAA), RecoveryDecision::UpToDate);
    }

    #[test]
    fn matching_gsn_with_different_crc_is_divergence() {
        assert_eq!(decide(10, 0xAAAA, 10, 0xBBBB), RecoveryDecision::Diverged);
    }

    #[test]
    fn peer_ahead_is_treated_as_up_to_date() {
        // A peer reporting a higher gsn than us means we are the one
        // behind; that case is handled by this node losing the election
        // to that peer, not by replaying anything to it.
        assert_eq!(decide(4, 0xAAAA, 10, 0xAAAA), RecoveryDecision::UpToDate);
    }
}

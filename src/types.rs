//! Core identifiers shared across the replication engine.

use serde::{Deserialize, Serialize};

/// Global sequence number. Assigned by the leader to every accepted
/// operation; strictly increasing cluster-wide.
pub type Gsn = u64;

/// Local log sequence number in the on-disk WAL.
pub type Lsn = u64;

/// Small integer identifying a host within the fixed cluster (`0..num_hosts`).
pub type HostId = u8;

/// Key used to detect write-write conflicts between concurrently admitted
/// operations (e.g. a row or shard identifier).
pub type ConflictKey = Vec<u8>;

/// CRC32 of the last committed operation's serialized body, used to detect
/// silent divergence between peers that otherwise agree on GSN.
pub type OpCrc = u32;

/// `2 * accepted > num_hosts` -- the majority rule used throughout the
/// commit coordinator and the election protocol.
pub fn is_majority(count: usize, num_hosts: usize) -> bool {
    2 * count > num_hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_boundaries() {
        assert!(!is_majority(0, 1));
        assert!(is_majority(1, 1));

        assert!(!is_majority(1, 2));
        assert!(is_majority(2, 2));

        assert!(!is_majority(1, 3));
        assert!(is_majority(2, 3));
        assert!(is_majority(3, 3));
    }
}

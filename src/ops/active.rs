//! C3: the active-op admission table.
//!
//! Before an operation is allowed onto the wire for a given peer, it must
//! be admitted against that peer's active-op table, keyed by conflict key.
//! Admission and bookkeeping happen in a single pass: the count is only
//! ever touched once a conflict check against the current state has
//! already passed, so there is no window where an operation is recorded
//! as active on a key it was in fact refused on.

use std::collections::HashMap;

use crate::cluster::ActiveOpEntry;
use crate::error::{Error, Result};
use crate::types::ConflictKey;

/// Which side originated the operation being admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Leader,
    Slave,
}

/// Attempt to admit an operation on `key` into `table`. A leader-originated
/// operation conflicts with any slave-originated operation already active
/// on the same key, and vice versa -- same-side operations on the same key
/// are allowed to coexist (they're already ordered by GSN downstream).
///
/// On success the table is updated to reflect the new operation; on
/// refusal the table is left exactly as it was.
pub fn try_admit(
    table: &mut HashMap<ConflictKey, ActiveOpEntry>,
    key: &ConflictKey,
    origin: Origin,
) -> Result<()> {
    let conflicts = match table.get(key) {
        Some(entry) => match origin {
            Origin::Leader => entry.slave_ops > 0,
            Origin::Slave => entry.leader_ops > 0,
        },
        None => false,
    };

    if conflicts {
        return Err(Error::Conflict(key.clone()));
    }

    let entry = table.entry(key.clone()).or_default();
    match origin {
        Origin::Leader => entry.leader_ops += 1,
        Origin::Slave => entry.slave_ops += 1,
    }
    Ok(())
}

/// Release a previously admitted operation on `key`. Removes the entry
/// entirely once both sides' counts return to zero.
pub fn release(table: &mut HashMap<ConflictKey, ActiveOpEntry>, key: &ConflictKey, origin: Origin) {
    if let Some(entry) = table.get_mut(key) {
        match origin {
            Origin::Leader => entry.leader_ops = entry.leader_ops.saturating_sub(1),
            Origin::Slave => entry.slave_ops = entry.slave_ops.saturating_sub(1),
        }
        if entry.leader_ops == 0 && entry.slave_ops == 0 {
            table.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_same_side_concurrently() {
        let mut table = HashMap::new();
        let key = vec![1, 2, 3];
        try_admit(&mut table, &key, Origin::Leader).unwrap();
        try_admit(&mut table, &key, Origin::Leader).unwrap();
        assert_eq!(table.get(&key).unwrap().leader_ops, 2);
    }

    #[test]
    fn refuses_opposite_side_on_same_key() {
        let mut table = HashMap::new();
        let key = vec![1, 2, 3];
        try_admit(&mut table, &key, Origin::Leader).unwrap();

        let err = try_admit(&mut table, &key, Origin::Slave).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        // Table must be unchanged by the refused attempt.
        let entry = table.get(&key).unwrap();
        assert_eq!(entry.leader_ops, 1);
        assert_eq!(entry.slave_ops, 0);
    }

    #[test]
    fn release_removes_entry_once_drained() {
        let mut table = HashMap::new();
        let key = vec![9];
        try_admit(&mut table, &key, Origin::Leader).unwrap();
        try_admit(&mut table, &key, Origin::Leader).unwrap();

        release(&mut table, &key, Origin::Leader);
        assert!(table.contains_key(&key));

        release(&mut table, &key, Origin::Leader);
        assert!(!table.contains_key(&key));
    }

    #[test]
    fn refused_admission_never_partially_updates_table() {
        // Regression test for the single-pass admission fix: a refused
        // attempt must never leave behind an increment on either side.
        let mut table = HashMap::new();
        let key = vec![4, 2];
        try_admit(&mut table, &key, Origin::Slave).unwrap();

        for _ in 0..3 {
            assert!(try_admit(&mut table, &key, Origin::Leader).is_err());
        }

        let entry = table.get(&key).unwrap();
        assert_eq!(entry.slave_ops, 1);
        assert_eq!(entry.leader_ops, 0);
    }
}

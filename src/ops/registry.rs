//! C4: the operation registry.
//!
//! Dual-indexed so the coordinator can look an operation up either by GSN
//! (replies from peers, WAL application order) or by conflict key (cascading
//! rollback: "every later-admitted operation on this key", in admission
//! order).

use std::collections::{BTreeMap, HashMap};

use crate::types::{ConflictKey, Gsn};

use super::operation::Operation;

#[derive(Default)]
pub struct Registry {
    by_gsn: BTreeMap<Gsn, Operation>,
    by_key: HashMap<ConflictKey, Vec<Gsn>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, op: Operation) {
        let key = op.conflict_key.clone();
        let gsn = op.gsn;
        self.by_key.entry(key).or_default().push(gsn);
        self.by_gsn.insert(gsn, op);
    }

    pub fn get(&self, gsn: Gsn) -> Option<&Operation> {
        self.by_gsn.get(&gsn)
    }

    pub fn get_mut(&mut self, gsn: Gsn) -> Option<&mut Operation> {
        self.by_gsn.get_mut(&gsn)
    }

    pub fn remove(&mut self, gsn: Gsn) -> Option<Operation> {
        let op = self.by_gsn.remove(&gsn)?;
        if let Some(gsns) = self.by_key.get_mut(&op.conflict_key) {
            gsns.retain(|g| *g != gsn);
            if gsns.is_empty() {
                self.by_key.remove(&op.conflict_key);
            }
        }
        Some(op)
    }

    /// GSNs of every operation admitted on `key` *after* `gsn`, in
    /// admission order -- the cascading-rollback order (reverse of this
    /// when actually rolling back).
    pub fn later_on_same_key(&self, key: &ConflictKey, gsn: Gsn) -> Vec<Gsn> {
        self.by_key
            .get(key)
            .map(|gsns| gsns.iter().copied().filter(|g| *g > gsn).collect())
            .unwrap_or_default()
    }

    /// GSNs of operations whose deadline has already passed.
    pub fn expired(&self, now: tokio::time::Instant) -> Vec<Gsn> {
        self.by_gsn
            .iter()
            .filter(|(_, op)| !op.is_resolved() && op.deadline <= now)
            .map(|(gsn, _)| *gsn)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_gsn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gsn.is_empty()
    }

    /// All GSNs currently tracked, ascending -- the order in which a
    /// loss-of-leader handler must walk the submit/accept queues.
    pub fn gsns_ascending(&self) -> impl Iterator<Item = Gsn> + '_ {
        self.by_gsn.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    fn op(gsn: Gsn, key: ConflictKey) -> Operation {
        let (tx, _rx) = oneshot::channel::<Result<super::super::operation::OpOutcome, Error>>();
        Operation::new(gsn, 0, key, vec![], Instant::now(), tx)
    }

    #[test]
    fn later_on_same_key_is_admission_ordered() {
        let mut reg = Registry::new();
        let key = vec![1];
        reg.insert(op(1, key.clone()));
        reg.insert(op(3, key.clone()));
        reg.insert(op(5, key.clone()));

        assert_eq!(reg.later_on_same_key(&key, 1), vec![3, 5]);
        assert_eq!(reg.later_on_same_key(&key, 5), Vec::<Gsn>::new());
    }

    #[test]
    fn remove_cleans_up_key_index() {
        let mut reg = Registry::new();
        let key = vec![2];
        reg.insert(op(10, key.clone()));
        reg.remove(10);
        assert!(reg.later_on_same_key(&key, 0).is_empty());
        assert!(reg.is_empty());
    }
}

//! The in-flight operation record tracked by the commit coordinator.

use std::collections::HashSet;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Error;
use crate::types::{ConflictKey, Gsn, HostId, Lsn};

/// Where an operation is in the commit state machine (spec: `init -> accept
/// -> wal -> submit -> yield`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Init,
    Accept,
    Wal,
    Submit,
    Yield,
    RolledBack,
}

/// The eventual outcome handed back to whatever originated the operation
/// (a local caller, or a proxied follower).
#[derive(Debug, Clone)]
pub enum OpOutcome {
    Committed,
    Rejected(String),
}

pub struct Operation {
    pub gsn: Gsn,
    pub lsn: Option<Lsn>,
    pub originator_id: HostId,
    pub conflict_key: ConflictKey,
    pub status: OpStatus,
    pub body: Vec<u8>,
    pub accepted: HashSet<HostId>,
    pub rejected: HashSet<HostId>,
    pub deadline: Instant,
    waker: Option<oneshot::Sender<Result<OpOutcome, Error>>>,
}

impl Operation {
    pub fn new(
        gsn: Gsn,
        originator_id: HostId,
        conflict_key: ConflictKey,
        body: Vec<u8>,
        deadline: Instant,
        waker: oneshot::Sender<Result<OpOutcome, Error>>,
    ) -> Self {
        Self {
            gsn,
            lsn: None,
            originator_id,
            conflict_key,
            status: OpStatus::Init,
            body,
            accepted: HashSet::new(),
            rejected: HashSet::new(),
            deadline,
            waker: Some(waker),
        }
    }

    /// Resolve this operation's waiting caller, if it hasn't already been
    /// resolved (e.g. by a prior timeout or rollback).
    pub fn resolve(&mut self, outcome: Result<OpOutcome, Error>) {
        if let Some(waker) = self.waker.take() {
            let _ = waker.send(outcome);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.waker.is_none()
    }
}

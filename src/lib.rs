//! gsnsync - a synchronous master-master replicated commit engine.
//!
//! Every accepted write is assigned a global sequence number (GSN) and is
//! not considered committed until a majority of the cluster's hosts have
//! durably logged it. One host holds leadership at a time; the rest proxy
//! their writes to it. Leadership itself is decided by connectivity, not
//! a heartbeat timer: whichever up host has gone the furthest (highest
//! GSN) is the only one eligible to lead.
//!
//! # Architecture
//!
//! [`coordinator::Coordinator`] drives the commit protocol end to end:
//! every peer link ([`peer`]), the operation registry and admission
//! control ([`ops`]), leader election ([`election`]), and the WAL/executor
//! boundary ([`executor`]) all meet there on a single task, so a write's
//! `init -> accept -> wal -> submit -> yield` progression never has to
//! cross a thread boundary to run to completion.

pub mod cluster;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod election;
pub mod error;
pub mod executor;
pub mod ops;
pub mod peer;
pub mod recovery;
pub mod state;
pub mod types;
pub mod wal;

pub use config::EngineConfig;
pub use error::{Error, Result};

/// Re-exports of the types most embedders and tests reach for.
pub mod prelude {
    pub use crate::cluster::Topology;
    pub use crate::codec::Message;
    pub use crate::config::EngineConfig;
    pub use crate::coordinator::Coordinator;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{FileWal, RequestExecutor, Wal};
    pub use crate::ops::OpOutcome;
    pub use crate::state::StateTracker;
    pub use crate::types::{ConflictKey, Gsn, HostId, Lsn};
}

//! Error types for the replication engine.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the replicated commit engine.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // WAL errors
    #[error("WAL error: {0}")]
    Wal(String),

    #[error("WAL segment not found: {0}")]
    WalSegmentNotFound(u64),

    #[error("WAL entry corrupted at LSN {lsn}: {reason}")]
    WalCorrupted { lsn: u64, reason: String },

    #[error("WAL serialization error: {0}")]
    WalSerialization(#[from] bincode::Error),

    // Wire framing errors (spec: framing_error) -- link-fatal, never cross
    // a link boundary into operation results.
    #[error("Framing error: {0}")]
    Framing(String),

    // Operation-level errors
    #[error("Operation conflict on key {0:?}")]
    Conflict(Vec<u8>),

    #[error("Operation {0} timed out waiting for quorum")]
    Timeout(u64),

    #[error("CRC divergence with peer {host_id} at gsn {gsn}: expected {expected:08x}, got {got:08x}")]
    Divergence {
        host_id: u8,
        gsn: u64,
        expected: u32,
        got: u32,
    },

    // Replication / cluster errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Not leader: current leader is host {0}")]
    NotLeader(u8),

    #[error("No leader available")]
    NoLeader,

    #[error("Host not found: {0}")]
    HostNotFound(u8),

    #[error("Quorum not reached: {accepted}/{num_hosts}")]
    QuorumNotReached { accepted: usize, num_hosts: usize },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // State errors
    #[error("State error: {0}")]
    State(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Recovery
    #[error("Recovery required: peer {host_id} is behind, needs gsn {from}")]
    RecoveryRequired { host_id: u8, from: u64 },

    // Internal / lifecycle
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// True if a submit/retry of the same operation may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_) | Error::QuorumNotReached { .. } | Error::Network(_)
        )
    }

    /// True if encountering this error means the link that produced it is
    /// no longer usable and must be torn down (spec §7: transport/framing
    /// errors never escape the replication thread as operation results).
    pub fn is_link_fatal(&self) -> bool {
        matches!(
            self,
            Error::Framing(_) | Error::Divergence { .. } | Error::Io(_)
        )
    }

    /// True if this error means the current node should give up leadership.
    pub fn should_step_down(&self) -> bool {
        matches!(self, Error::QuorumNotReached { .. } | Error::Network(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::State(format!("sqlite error: {}", e))
    }
}

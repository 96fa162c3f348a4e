//! Cluster configuration and per-peer runtime state.
//!
//! The cluster is fixed at startup: `host_id` is simply a peer's position
//! in the configured `replica` list, and membership never changes while the
//! process runs (dynamic membership is out of scope).

use std::collections::VecDeque;

use crate::codec::Message;
use crate::config::EngineConfig;
use crate::types::{ConflictKey, Gsn, HostId, OpCrc};

/// A single entry of the fixed cluster topology.
#[derive(Debug, Clone)]
pub struct HostDescriptor {
    pub host_id: HostId,
    pub address: String,
    pub is_local: bool,
}

/// The fixed cluster topology, derived once from configuration.
#[derive(Debug, Clone)]
pub struct Topology {
    pub hosts: Vec<HostDescriptor>,
    pub local_id: HostId,
}

impl Topology {
    pub fn from_config(config: &EngineConfig) -> Self {
        let local_id = config.local_id();
        let hosts = config
            .cluster
            .replica
            .iter()
            .enumerate()
            .map(|(i, address)| HostDescriptor {
                host_id: i as HostId,
                address: address.clone(),
                is_local: i as HostId == local_id,
            })
            .collect();

        Self { hosts, local_id }
    }

    pub fn num_hosts(&self) -> usize {
        self.hosts.len()
    }

    pub fn peers(&self) -> impl Iterator<Item = &HostDescriptor> {
        self.hosts.iter().filter(|h| !h.is_local)
    }

    pub fn get(&self, host_id: HostId) -> Option<&HostDescriptor> {
        self.hosts.iter().find(|h| h.host_id == host_id)
    }
}

/// Connection phase of a peer link, per the spec's three-state machine:
/// 0 = disconnected, 1 = connecting/handshaking, 2 = established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Runtime state tracked for one remote peer.
///
/// `op_queue` is the correlation mechanism for replies that don't carry
/// their own GSN unambiguously tied to a request: messages sent to this
/// peer are pushed here in send order, and a reply is matched against the
/// front of the queue (FIFO), not looked up by GSN.
pub struct PeerState {
    pub host_id: HostId,
    pub connected: LinkState,
    /// Highest GSN this peer is known to have committed.
    pub gsn: Gsn,
    /// Outbound messages not yet handed to the socket.
    pub send_queue: VecDeque<Message>,
    /// Outstanding operations sent to this peer, in send order.
    pub op_queue: VecDeque<Gsn>,
    /// Active-op admission table for this peer (C3): conflict key to the
    /// counts of in-flight operations touching it.
    pub active_ops: std::collections::HashMap<ConflictKey, ActiveOpEntry>,
    /// CRC of the last operation body this peer is known to have committed.
    pub last_op_crc: OpCrc,
}

/// One entry of the active-op admission table (C3).
#[derive(Debug, Clone, Default)]
pub struct ActiveOpEntry {
    /// Count of operations on this key originated by the slave (follower)
    /// side and still in flight.
    pub slave_ops: u32,
    /// Count of operations on this key originated by the leader side and
    /// still in flight.
    pub leader_ops: u32,
}

impl PeerState {
    pub fn new(host_id: HostId) -> Self {
        Self {
            host_id,
            connected: LinkState::Disconnected,
            gsn: 0,
            send_queue: VecDeque::new(),
            op_queue: VecDeque::new(),
            active_ops: std::collections::HashMap::new(),
            last_op_crc: 0,
        }
    }

    pub fn is_up(&self) -> bool {
        self.connected == LinkState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, EngineConfig, LoggingConfig, NodeConfig, WalConfig};

    fn config(local: &str) -> EngineConfig {
        EngineConfig {
            node: NodeConfig {
                data_dir: "/tmp/x".into(),
            },
            wal: WalConfig::default(),
            cluster: ClusterConfig {
                replica: vec!["a:1".into(), "b:1".into(), "c:1".into()],
                local: local.into(),
                enable: true,
                read_timeout_secs: 1.0,
                write_timeout_secs: 1.0,
                connect_timeout_secs: 1.0,
                reconnect_timeout_secs: 1.0,
                ping_timeout_secs: 1.0,
                election_timeout_secs: 1.0,
                operation_timeout_secs: 1.0,
                slow_host_timeout_secs: 1.0,
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn derives_host_ids_from_position() {
        let topo = Topology::from_config(&config("b:1"));
        assert_eq!(topo.local_id, 1);
        assert_eq!(topo.num_hosts(), 3);
        assert_eq!(topo.peers().count(), 2);
        assert!(topo.get(1).unwrap().is_local);
        assert!(!topo.get(0).unwrap().is_local);
    }
}

//! The peer link message set.
//!
//! Every message on the wire is a one-byte type tag followed by a
//! bincode-encoded payload. Tags are small integers (0-13); any other tag
//! is a framing error, as is a payload that fails to decode against the
//! tag's expected shape.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ConflictKey, Gsn, HostId, OpCrc};

const TAG_HELLO: u8 = 0;
const TAG_LEADER_PROMISE: u8 = 1;
const TAG_LEADER_ACCEPT: u8 = 2;
const TAG_LEADER_SUBMIT: u8 = 3;
const TAG_LEADER_REJECT: u8 = 4;
const TAG_BODY: u8 = 5;
const TAG_SUBMIT: u8 = 6;
const TAG_REJECT: u8 = 7;
const TAG_PROXY_REQUEST: u8 = 8;
const TAG_PROXY_ACCEPT: u8 = 9;
const TAG_PROXY_SUBMIT: u8 = 10;
const TAG_PROXY_REJECT: u8 = 11;
const TAG_PROXY_JOIN: u8 = 12;
const TAG_PING: u8 = 13;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub host_id: HostId,
    pub gsn: Gsn,
    pub last_op_crc: OpCrc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderPromise {
    pub candidate_id: HostId,
    pub gsn: Gsn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderAccept {
    pub voter_id: HostId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderSubmit {
    pub leader_id: HostId,
    pub gsn: Gsn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderReject {
    pub best_host_id: HostId,
    pub best_gsn: Gsn,
}

/// The operation body, sent leader -> follower to replicate a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    pub gsn: Gsn,
    pub conflict_key: ConflictKey,
    pub payload: Vec<u8>,
}

/// Leader -> follower: commit the operation at `gsn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submit {
    pub gsn: Gsn,
}

/// Leader -> follower: abort the operation at `gsn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reject {
    pub gsn: Gsn,
    pub reason: String,
}

/// Follower -> leader: originate a write on the follower's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub conflict_key: ConflictKey,
    pub payload: Vec<u8>,
}

/// Leader -> follower: the proxied request was admitted as `gsn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAccept {
    pub gsn: Gsn,
}

/// Leader -> follower: the proxied operation committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySubmit {
    pub gsn: Gsn,
}

/// Leader -> follower: the proxied operation was rejected. `gsn` is 0 when
/// the rejection happens before a GSN was ever assigned (not leader, or an
/// admission conflict on the leader's table); otherwise it names the
/// operation being rejected, and `handle_proxy_reject` asserts it against
/// the queued request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyReject {
    pub gsn: Gsn,
    pub reason: String,
}

/// Reserved for dynamic-membership join handshakes. Not produced by this
/// engine (dynamic membership is out of scope) but accepted on the wire so
/// unknown-but-reserved tags don't trip the framing-error path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyJoin {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub gsn: Gsn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Hello(Hello),
    LeaderPromise(LeaderPromise),
    LeaderAccept(LeaderAccept),
    LeaderSubmit(LeaderSubmit),
    LeaderReject(LeaderReject),
    Body(Body),
    Submit(Submit),
    Reject(Reject),
    ProxyRequest(ProxyRequest),
    ProxyAccept(ProxyAccept),
    ProxySubmit(ProxySubmit),
    ProxyReject(ProxyReject),
    ProxyJoin(ProxyJoin),
    Ping(Ping),
}

impl Message {
    fn tag(&self) -> u8 {
        match self {
            Message::Hello(_) => TAG_HELLO,
            Message::LeaderPromise(_) => TAG_LEADER_PROMISE,
            Message::LeaderAccept(_) => TAG_LEADER_ACCEPT,
            Message::LeaderSubmit(_) => TAG_LEADER_SUBMIT,
            Message::LeaderReject(_) => TAG_LEADER_REJECT,
            Message::Body(_) => TAG_BODY,
            Message::Submit(_) => TAG_SUBMIT,
            Message::Reject(_) => TAG_REJECT,
            Message::ProxyRequest(_) => TAG_PROXY_REQUEST,
            Message::ProxyAccept(_) => TAG_PROXY_ACCEPT,
            Message::ProxySubmit(_) => TAG_PROXY_SUBMIT,
            Message::ProxyReject(_) => TAG_PROXY_REJECT,
            Message::ProxyJoin(_) => TAG_PROXY_JOIN,
            Message::Ping(_) => TAG_PING,
        }
    }

    /// Encode to a frame body: one tag byte followed by the bincode payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.tag()];
        let payload = match self {
            Message::Hello(m) => bincode::serialize(m),
            Message::LeaderPromise(m) => bincode::serialize(m),
            Message::LeaderAccept(m) => bincode::serialize(m),
            Message::LeaderSubmit(m) => bincode::serialize(m),
            Message::LeaderReject(m) => bincode::serialize(m),
            Message::Body(m) => bincode::serialize(m),
            Message::Submit(m) => bincode::serialize(m),
            Message::Reject(m) => bincode::serialize(m),
            Message::ProxyRequest(m) => bincode::serialize(m),
            Message::ProxyAccept(m) => bincode::serialize(m),
            Message::ProxySubmit(m) => bincode::serialize(m),
            Message::ProxyReject(m) => bincode::serialize(m),
            Message::ProxyJoin(m) => bincode::serialize(m),
            Message::Ping(m) => bincode::serialize(m),
        }
        .map_err(|e| Error::Framing(format!("failed to encode payload: {e}")))?;
        out.extend(payload);
        Ok(out)
    }

    /// Decode a frame body. An unrecognized tag or malformed payload is
    /// always a framing error -- never an operation-level error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::Framing("empty frame body".into()))?;

        let map_err = |e: bincode::Error| Error::Framing(format!("malformed payload: {e}"));

        Ok(match tag {
            TAG_HELLO => Message::Hello(bincode::deserialize(payload).map_err(map_err)?),
            TAG_LEADER_PROMISE => {
                Message::LeaderPromise(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_LEADER_ACCEPT => {
                Message::LeaderAccept(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_LEADER_SUBMIT => {
                Message::LeaderSubmit(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_LEADER_REJECT => {
                Message::LeaderReject(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_BODY => Message::Body(bincode::deserialize(payload).map_err(map_err)?),
            TAG_SUBMIT => Message::Submit(bincode::deserialize(payload).map_err(map_err)?),
            TAG_REJECT => Message::Reject(bincode::deserialize(payload).map_err(map_err)?),
            TAG_PROXY_REQUEST => {
                Message::ProxyRequest(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_PROXY_ACCEPT => {
                Message::ProxyAccept(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_PROXY_SUBMIT => {
                Message::ProxySubmit(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_PROXY_REJECT => {
                Message::ProxyReject(bincode::deserialize(payload).map_err(map_err)?)
            }
            TAG_PROXY_JOIN => Message::ProxyJoin(bincode::deserialize(payload).map_err(map_err)?),
            TAG_PING => Message::Ping(bincode::deserialize(payload).map_err(map_err)?),
            other => return Err(Error::Framing(format!("unknown message tag {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        let messages = vec![
            Message::Hello(Hello {
                host_id: 1,
                gsn: 42,
                last_op_crc: 0xdead_beef,
            }),
            Message::LeaderPromise(LeaderPromise {
                candidate_id: 2,
                gsn: 10,
            }),
            Message::LeaderAccept(LeaderAccept { voter_id: 0 }),
            Message::LeaderSubmit(LeaderSubmit {
                leader_id: 2,
                gsn: 10,
            }),
            Message::LeaderReject(LeaderReject {
                best_host_id: 1,
                best_gsn: 11,
            }),
            Message::Body(Body {
                gsn: 5,
                conflict_key: vec![1, 2, 3],
                payload: vec![9, 9],
            }),
            Message::Submit(Submit { gsn: 5 }),
            Message::Reject(Reject {
                gsn: 5,
                reason: "conflict".into(),
            }),
            Message::ProxyRequest(ProxyRequest {
                conflict_key: vec![7],
                payload: vec![1],
            }),
            Message::ProxyAccept(ProxyAccept { gsn: 6 }),
            Message::ProxySubmit(ProxySubmit { gsn: 6 }),
            Message::ProxyReject(ProxyReject {
                gsn: 6,
                reason: "busy".into(),
            }),
            Message::ProxyJoin(ProxyJoin {}),
            Message::Ping(Ping { gsn: 6 }),
        ];

        for msg in messages {
            let encoded = msg.encode().unwrap();
            let decoded = Message::decode(&encoded).unwrap();
            assert_eq!(msg.tag(), decoded.tag());
        }
    }

    #[test]
    fn unknown_tag_is_a_framing_error() {
        let bytes = vec![255u8, 0, 0];
        let err = Message::decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn empty_frame_is_a_framing_error() {
        let err = Message::decode(&[]).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }
}

//! C2: peer links -- one persistent duplex connection per remote host,
//! plus the listener that demuxes inbound sockets to the right link.

pub mod link;
pub mod listener;

pub use link::{LinkEvent, PeerHandle};

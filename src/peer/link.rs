//! C2: the peer link.
//!
//! Each peer gets one persistent duplex connection, established either by
//! dialing out (the lower `host_id` of the pair initiates, to avoid two
//! nodes both opening a connection to each other) or by accepting whatever
//! the listener hands us. Once up, the link runs two independent tasks --
//! an outbound task owning the write half (drains the send queue, sends
//! idle pings) and an inbound task owning the read half (dispatches
//! incoming messages) -- so a stall on one side never blocks the other.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::codec::{read_message, write_message, Hello, Message, Ping};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::types::{Gsn, HostId, OpCrc};

/// Events the link reports up to the coordinator.
#[derive(Debug)]
pub enum LinkEvent {
    Up {
        host_id: HostId,
        peer_gsn: Gsn,
        peer_last_op_crc: OpCrc,
    },
    Down(HostId),
    Message(HostId, Message),
}

/// A handle the coordinator uses to push outbound messages to one peer.
#[derive(Clone)]
pub struct PeerHandle {
    pub host_id: HostId,
    outbound: mpsc::Sender<Message>,
}

impl PeerHandle {
    /// Enqueue a message for this peer. Drops it silently if the link is
    /// currently down -- the coordinator is responsible for deciding
    /// whether a dropped send needs a retry/rollback.
    pub fn send(&self, message: Message) {
        let _ = self.outbound.try_send(message);
    }
}

/// Spawn the supervisor for one peer: retries the connection forever
/// (initiator side) or waits for accepted sockets (acceptor side), running
/// one session at a time.
pub fn spawn(
    local_id: HostId,
    host_id: HostId,
    address: String,
    config: Arc<EngineConfig>,
    local_gsn_fn: impl Fn() -> Gsn + Send + Sync + 'static,
    local_crc_fn: impl Fn() -> OpCrc + Send + Sync + 'static,
    events_tx: mpsc::Sender<LinkEvent>,
    mut accept_rx: Option<mpsc::Receiver<(TcpStream, Hello)>>,
) -> PeerHandle {
    let (outbound_tx, outbound_rx) = mpsc::channel(1024);
    let is_initiator = local_id < host_id;

    tokio::spawn(async move {
        let mut outbound_rx = outbound_rx;
        loop {
            let (stream, pre_read_hello) = if is_initiator {
                match timeout(config.connect_timeout(), TcpStream::connect(&address)).await {
                    Ok(Ok(stream)) => (stream, None),
                    _ => {
                        tokio::time::sleep(config.reconnect_timeout()).await;
                        continue;
                    }
                }
            } else {
                match accept_rx.as_mut() {
                    Some(rx) => match rx.recv().await {
                        Some((stream, hello)) => (stream, Some(hello)),
                        None => return,
                    },
                    None => return,
                }
            };

            run_session(
                local_id,
                host_id,
                stream,
                pre_read_hello,
                &config,
                &local_gsn_fn,
                &local_crc_fn,
                &events_tx,
                &mut outbound_rx,
            )
            .await;

            let _ = events_tx.send(LinkEvent::Down(host_id)).await;

            if !is_initiator {
                // Acceptor side waits for the next inbound socket; no
                // backoff needed since we aren't the one dialing.
                continue;
            }
            tokio::time::sleep(config.reconnect_timeout()).await;
        }
    });

    PeerHandle {
        host_id,
        outbound: outbound_tx,
    }
}

async fn run_session(
    local_id: HostId,
    host_id: HostId,
    stream: TcpStream,
    pre_read_hello: Option<Hello>,
    config: &EngineConfig,
    local_gsn_fn: &(impl Fn() -> Gsn + Send + Sync),
    local_crc_fn: &(impl Fn() -> OpCrc + Send + Sync),
    events_tx: &mpsc::Sender<LinkEvent>,
    outbound_rx: &mut mpsc::Receiver<Message>,
) {
    stream.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = stream.into_split();

    let hello = Message::Hello(Hello {
        host_id: local_id,
        gsn: local_gsn_fn(),
        last_op_crc: local_crc_fn(),
    });

    if timeout(config.write_timeout(), write_message(&mut write_half, &hello))
        .await
        .is_err()
    {
        return;
    }

    let peer_hello = match pre_read_hello {
        Some(hello) => hello,
        None => match timeout(config.read_timeout(), read_message(&mut read_half)).await {
            Ok(Ok(Message::Hello(hello))) => hello,
            _ => return,
        },
    };

    if peer_hello.host_id != host_id {
        tracing::warn!(
            expected = host_id,
            got = peer_hello.host_id,
            "peer hello host_id mismatch, dropping link"
        );
        return;
    }

    if events_tx
        .send(LinkEvent::Up {
            host_id,
            peer_gsn: peer_hello.gsn,
            peer_last_op_crc: peer_hello.last_op_crc,
        })
        .await
        .is_err()
    {
        return;
    }

    let inbound = inbound_task(host_id, read_half, events_tx.clone(), config.read_timeout());
    let outbound = outbound_task(write_half, outbound_rx, config.ping_timeout(), local_gsn_fn);

    tokio::select! {
        _ = inbound => {}
        _ = outbound => {}
    }
}

async fn inbound_task<R: AsyncRead + Unpin>(
    host_id: HostId,
    mut reader: R,
    events_tx: mpsc::Sender<LinkEvent>,
    read_timeout: Duration,
) {
    loop {
        let result = timeout(read_timeout, read_message(&mut reader)).await;
        match result {
            Ok(Ok(message)) => {
                if events_tx
                    .send(LinkEvent::Message(host_id, message))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(Err(e)) => {
                if e.is_link_fatal() {
                    tracing::warn!(host_id, error = %e, "link-fatal error, tearing down");
                }
                return;
            }
            Err(_) => {
                // read timeout: treat as a dead connection, not a framing
                // error -- the outbound side's ping traffic is what should
                // have kept this alive.
                return;
            }
        }
    }
}

async fn outbound_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    outbound_rx: &mut mpsc::Receiver<Message>,
    ping_timeout: Duration,
    local_gsn_fn: &(impl Fn() -> Gsn + Send + Sync),
) {
    loop {
        tokio::select! {
            maybe_message = outbound_rx.recv() => {
                match maybe_message {
                    Some(message) => {
                        if write_message(&mut writer, &message).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = tokio::time::sleep(ping_timeout) => {
                let ping = Message::Ping(Ping { gsn: local_gsn_fn() });
                if write_message(&mut writer, &ping).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Maps `Error` for callers that need to decide whether a link-layer
/// failure is worth logging loudly.
pub fn is_fatal(err: &Error) -> bool {
    err.is_link_fatal()
}

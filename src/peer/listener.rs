//! The peer socket listener.
//!
//! Accepts every inbound connection on the configured local address, reads
//! its hello to learn which peer it is, and routes the raw socket plus the
//! already-read hello to that peer's link supervisor. A connection from an
//! unknown or unconfigured host_id is dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::codec::{read_message, Hello, Message};
use crate::types::HostId;

pub async fn run(
    bind_address: String,
    read_timeout: Duration,
    routes: HashMap<HostId, mpsc::Sender<(TcpStream, Hello)>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "peer listener bound");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let routes = routes.clone();
        tokio::spawn(async move {
            stream.set_nodelay(true).ok();
            let mut stream = stream;

            let hello = match tokio::time::timeout(read_timeout, read_message(&mut stream)).await
            {
                Ok(Ok(Message::Hello(hello))) => hello,
                Ok(Ok(_)) => {
                    tracing::warn!(%peer_addr, "first message on inbound link was not hello");
                    return;
                }
                _ => {
                    tracing::warn!(%peer_addr, "hello handshake failed");
                    return;
                }
            };

            match routes.get(&hello.host_id) {
                Some(route) => {
                    let _ = route.send((stream, hello)).await;
                }
                None => {
                    tracing::warn!(
                        host_id = hello.host_id,
                        %peer_addr,
                        "inbound connection from unconfigured host_id"
                    );
                }
            }
        });
    }
}

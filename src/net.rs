use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::message::PaxosMessage;
use crate::node::Node;

const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Outbound side of the peer wire protocol: one serialized message per
/// connection (connect, write, close). The local node is in the address book
/// and is messaged like any other peer.
pub struct Transport {
    addrs: HashMap<u64, String>,
}

impl Transport {
    pub fn new(config: &ClusterConfig) -> Self {
        let addrs = config
            .nodes
            .iter()
            .map(|p| (p.node_id, p.addr.clone()))
            .collect();
        Self { addrs }
    }

    /// Unicast to one peer. Failures are logged and swallowed; the protocol
    /// recovers through timeouts, not delivery guarantees.
    pub async fn send_to(&self, peer: u64, msg: &PaxosMessage) {
        let Some(addr) = self.addrs.get(&peer) else {
            tracing::warn!(peer, "No address configured for peer");
            return;
        };
        let Some(bytes) = encode(msg) else { return };
        send_with_timeout(addr, &bytes, peer).await;
    }

    /// Fan out to every configured peer, self included. Sends run as
    /// independent tasks: a dead peer neither blocks nor aborts the others.
    pub async fn broadcast(&self, msg: &PaxosMessage) {
        let Some(bytes) = encode(msg) else { return };
        for (peer, addr) in &self.addrs {
            let peer = *peer;
            let addr = addr.clone();
            let bytes = bytes.clone();
            tokio::spawn(async move {
                send_with_timeout(&addr, &bytes, peer).await;
            });
        }
    }
}

fn encode(msg: &PaxosMessage) -> Option<Vec<u8>> {
    match serde_json::to_vec(msg) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode message");
            None
        }
    }
}

async fn send_with_timeout(addr: &str, bytes: &[u8], peer: u64) {
    match tokio::time::timeout(SEND_TIMEOUT, send_raw(addr, bytes)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(peer, addr, error = %e, "Failed to send to peer");
        }
        Err(_) => {
            tracing::warn!(peer, addr, "Send to peer timed out");
        }
    }
}

async fn send_raw(addr: &str, bytes: &[u8]) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Inbound side: accepts connections, reads one message each, and dispatches
/// into the node's role handlers on a task per connection.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind before spawning `run`, so peers can never race a half-started
    /// listener.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub async fn run(self, node: Arc<Node>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = node.node_id(), "Listener shutting down");
                    break;
                }
                accepted = self.inner.accept() => {
                    match accepted {
                        Ok((stream, _peer)) => {
                            let node = node.clone();
                            tokio::spawn(handle_connection(stream, node));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, node: Arc<Node>) {
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        tracing::warn!(error = %e, "Failed to read inbound message");
        return;
    }
    match serde_json::from_slice::<PaxosMessage>(&buf) {
        Ok(msg) => node.handle_message(msg).await,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding undecodable message");
        }
    }
}

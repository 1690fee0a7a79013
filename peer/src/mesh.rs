//! Peer mesh transport: reliable ordered byte streams between peers.
//!
//! Stands in for the discovery/overlay collaborator: peers dial each other
//! directly over TCP instead of rendezvousing on a topic, but the surface
//! the session sees is the same, a set of open connections carrying
//! newline-delimited payloads in order. The first line of every connection
//! is a handshake: each side sends its full hex public key so the other can
//! derive its peer id.
//!
//! Broadcast is fire-and-forget: no acknowledgment, no retry, no
//! backpressure. A connection that errors out is dropped and reported.

use crate::identity::peer_id_from_key_hex;
use log::{debug, error, info, warn};
use protocol::PeerId;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

/// Events the mesh reports to the session event loop.
#[derive(Debug)]
pub enum MeshEvent {
    PeerConnected { id: PeerId },
    PeerDisconnected { id: PeerId },
    Data { from: PeerId, payload: Vec<u8> },
}

/// One open connection: the peer's id and the queue its writer task drains.
struct Link {
    id: PeerId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// The set of open connections, in acceptance order.
#[derive(Clone)]
pub struct Mesh {
    public_key_hex: String,
    links: Arc<RwLock<Vec<Link>>>,
    event_tx: mpsc::UnboundedSender<MeshEvent>,
}

impl Mesh {
    pub fn new(public_key_hex: String, event_tx: mpsc::UnboundedSender<MeshEvent>) -> Self {
        Self {
            public_key_hex,
            links: Arc::new(RwLock::new(Vec::new())),
            event_tx,
        }
    }

    /// Binds a listener and starts accepting inbound connections.
    /// Returns the bound address (useful with port 0).
    pub async fn listen(
        &self,
        addr: &str,
    ) -> Result<SocketAddr, Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening for peers on {}", local_addr);

        let key = self.public_key_hex.clone();
        let links = Arc::clone(&self.links);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!("Inbound connection from {}", peer_addr);
                        tokio::spawn(Self::run_connection(
                            key.clone(),
                            Arc::clone(&links),
                            event_tx.clone(),
                            stream,
                        ));
                    }
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Dials a peer by address.
    pub async fn connect(
        &self,
        addr: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let stream = TcpStream::connect(addr).await?;
        debug!("Dialed peer at {}", addr);
        tokio::spawn(Self::run_connection(
            self.public_key_hex.clone(),
            Arc::clone(&self.links),
            self.event_tx.clone(),
            stream,
        ));
        Ok(())
    }

    /// Handshake plus reader/writer tasks for one connection. Runs until
    /// the stream closes or errors.
    async fn run_connection(
        public_key_hex: String,
        links: Arc<RwLock<Vec<Link>>>,
        event_tx: mpsc::UnboundedSender<MeshEvent>,
        stream: TcpStream,
    ) {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Exchange public keys; ours goes out first, theirs is the first
        // line we read.
        if let Err(e) = write_half
            .write_all(format!("{}\n", public_key_hex).as_bytes())
            .await
        {
            warn!("Handshake write failed: {}", e);
            return;
        }

        let mut key_line = String::new();
        match reader.read_line(&mut key_line).await {
            Ok(0) | Err(_) => {
                warn!("Connection closed during handshake");
                return;
            }
            Ok(_) => {}
        }
        let key_hex = key_line.trim();
        if key_hex.len() != 64 || hex::decode(key_hex).is_err() {
            warn!("Rejecting connection with invalid handshake key");
            return;
        }
        let id = peer_id_from_key_hex(key_hex);
        info!("Peer {} connected{}", id, match peer_addr {
            Some(addr) => format!(" from {}", addr),
            None => String::new(),
        });

        // Writer task drains this connection's outbound queue.
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        {
            let mut links_guard = links.write().await;
            links_guard.push(Link {
                id: id.clone(),
                tx: tx.clone(),
            });
        }
        if event_tx
            .send(MeshEvent::PeerConnected { id: id.clone() })
            .is_err()
        {
            return;
        }

        let writer_id = id.clone();
        let writer = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if write_half.write_all(&payload).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    debug!("Write to peer {} failed", writer_id);
                    break;
                }
            }
        });

        // Read until EOF, forwarding each frame to the event loop.
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let payload = line.trim_end().as_bytes().to_vec();
                    if payload.is_empty() {
                        continue;
                    }
                    if event_tx
                        .send(MeshEvent::Data {
                            from: id.clone(),
                            payload,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Read from peer {} failed: {}", id, e);
                    break;
                }
            }
        }

        writer.abort();
        {
            let mut links_guard = links.write().await;
            if let Some(pos) = links_guard
                .iter()
                .position(|link| link.id == id && link.tx.same_channel(&tx))
            {
                links_guard.remove(pos);
            }
        }
        info!("Peer {} disconnected", id);
        let _ = event_tx.send(MeshEvent::PeerDisconnected { id });
    }

    /// Peer ids of every open connection, in acceptance order.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let links = self.links.read().await;
        links.iter().map(|link| link.id.clone()).collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Writes a payload to every open connection. Failures only mean the
    /// connection is already going away; its reader task will report the
    /// disconnect.
    pub async fn broadcast(&self, payload: &[u8]) {
        let links = self.links.read().await;
        for link in links.iter() {
            let _ = link.tx.send(payload.to_vec());
        }
    }

    /// Writes a payload to a single peer, if a connection to it is open.
    pub async fn send_to(&self, to: &PeerId, payload: &[u8]) {
        let links = self.links.read().await;
        match links.iter().find(|link| &link.id == to) {
            Some(link) => {
                let _ = link.tx.send(payload.to_vec());
            }
            None => debug!("No open connection to peer {}", to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use tokio::time::{timeout, Duration};

    async fn recv_event(rx: &mut mpsc::UnboundedReceiver<MeshEvent>) -> MeshEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for mesh event")
            .expect("mesh event channel closed")
    }

    #[tokio::test]
    async fn test_handshake_and_data_exchange() {
        let a = Identity::generate();
        let b = Identity::generate();

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();

        let mesh_a = Mesh::new(a.public_key_hex().to_string(), a_tx);
        let mesh_b = Mesh::new(b.public_key_hex().to_string(), b_tx);

        let addr = mesh_a.listen("127.0.0.1:0").await.unwrap();
        mesh_b.connect(&addr.to_string()).await.unwrap();

        match recv_event(&mut a_rx).await {
            MeshEvent::PeerConnected { id } => assert_eq!(&id, b.id()),
            other => panic!("Expected PeerConnected, got {:?}", other),
        }
        match recv_event(&mut b_rx).await {
            MeshEvent::PeerConnected { id } => assert_eq!(&id, a.id()),
            other => panic!("Expected PeerConnected, got {:?}", other),
        }

        mesh_b.broadcast(br#"{"type":"clear"}"#).await;
        match recv_event(&mut a_rx).await {
            MeshEvent::Data { from, payload } => {
                assert_eq!(&from, b.id());
                assert_eq!(payload, br#"{"type":"clear"}"#.to_vec());
            }
            other => panic!("Expected Data, got {:?}", other),
        }

        assert_eq!(mesh_a.connected_peers().await, vec![b.id().clone()]);
        assert_eq!(mesh_b.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_send_to_targets_one_peer() {
        let a = Identity::generate();
        let b = Identity::generate();
        let c = Identity::generate();

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (c_tx, mut c_rx) = mpsc::unbounded_channel();

        let mesh_a = Mesh::new(a.public_key_hex().to_string(), a_tx);
        let mesh_b = Mesh::new(b.public_key_hex().to_string(), b_tx);
        let mesh_c = Mesh::new(c.public_key_hex().to_string(), c_tx);

        let addr = mesh_a.listen("127.0.0.1:0").await.unwrap();
        mesh_b.connect(&addr.to_string()).await.unwrap();
        mesh_c.connect(&addr.to_string()).await.unwrap();

        // Drain the connect events on all sides.
        recv_event(&mut a_rx).await;
        recv_event(&mut a_rx).await;
        recv_event(&mut b_rx).await;
        recv_event(&mut c_rx).await;

        mesh_a.send_to(b.id(), b"targeted").await;
        match recv_event(&mut b_rx).await {
            MeshEvent::Data { from, payload } => {
                assert_eq!(&from, a.id());
                assert_eq!(payload, b"targeted".to_vec());
            }
            other => panic!("Expected Data, got {:?}", other),
        }
        // C must not see the targeted payload.
        assert!(
            timeout(Duration::from_millis(200), c_rx.recv()).await.is_err(),
            "send_to leaked to an unrelated peer"
        );
    }
}

//! Live connection tracking for the multiplexer
//!
//! This module owns every accepted stream for its whole lifetime:
//! - Connection ids, assigned in accept order and never reused
//! - Capacity enforcement for new connections
//! - Per-connection continuation state while an upstream request is in flight
//!
//! Streams are never shared or cloned; dropping a [`Connection`] closes it.

use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Identifies one accepted connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An accepted client stream and its loop-side state
#[derive(Debug)]
pub struct Connection {
    /// Id assigned on accept
    pub id: ConnectionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// The stream itself, owned exclusively by this struct
    pub stream: TcpStream,
    /// When the connection was accepted
    pub connected_at: Instant,
    /// Set while a request of this connection is on the worker pool
    awaiting_upstream: bool,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, stream: TcpStream) -> Self {
        Self {
            id,
            addr,
            stream,
            connected_at: Instant::now(),
            awaiting_upstream: false,
        }
    }

    /// True while the connection waits for an upstream completion.
    ///
    /// Such a connection is not read from, so its replies stay in request
    /// order and the user has at most one store mutation in flight.
    pub fn is_awaiting_upstream(&self) -> bool {
        self.awaiting_upstream
    }

    pub fn set_awaiting_upstream(&mut self, awaiting: bool) {
        self.awaiting_upstream = awaiting;
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Set of live connections, ordered by id
pub struct ConnectionManager {
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection_id: u64,
    max_connections: usize,
}

impl ConnectionManager {
    /// Creates an empty manager accepting at most `max_connections` streams.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Registers an accepted stream.
    ///
    /// Returns `None` when the server is at capacity; the stream is dropped and
    /// thereby closed.
    pub fn add_connection(&mut self, stream: TcpStream, addr: SocketAddr) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            warn!(
                "Rejecting connection from {}: {} connections already open",
                addr,
                self.connections.len()
            );
            return None;
        }

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        info!("Connection {} opened from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr, stream));
        Some(id)
    }

    /// Removes a connection, handing it back so the caller decides when the
    /// stream is dropped.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn accepted_stream(listener: &TcpListener) -> (TcpStream, SocketAddr, TcpStream) {
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        (server_side, peer, client)
    }

    #[tokio::test]
    async fn test_add_connection_assigns_increasing_ids() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut manager = ConnectionManager::new(4);

        let (stream1, addr1, _client1) = accepted_stream(&listener).await;
        let (stream2, addr2, _client2) = accepted_stream(&listener).await;

        assert_eq!(manager.add_connection(stream1, addr1), Some(ConnectionId(1)));
        assert_eq!(manager.add_connection(stream2, addr2), Some(ConnectionId(2)));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(ConnectionId(2)).unwrap().addr, addr2);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut manager = ConnectionManager::new(1);

        let (stream1, addr1, _client1) = accepted_stream(&listener).await;
        let (stream2, addr2, _client2) = accepted_stream(&listener).await;

        assert!(manager.add_connection(stream1, addr1).is_some());
        assert!(manager.add_connection(stream2, addr2).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut manager = ConnectionManager::new(4);

        let (stream1, addr1, _client1) = accepted_stream(&listener).await;
        let id1 = manager.add_connection(stream1, addr1).unwrap();
        assert!(manager.remove_connection(id1).is_some());
        assert!(manager.remove_connection(id1).is_none());
        assert!(manager.is_empty());

        let (stream2, addr2, _client2) = accepted_stream(&listener).await;
        let id2 = manager.add_connection(stream2, addr2).unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_awaiting_upstream_flag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut manager = ConnectionManager::new(4);
        let (stream, addr, _client) = accepted_stream(&listener).await;
        let id = manager.add_connection(stream, addr).unwrap();

        let connection = manager.get_mut(id).unwrap();
        assert!(!connection.is_awaiting_upstream());
        connection.set_awaiting_upstream(true);
        assert!(manager.get(id).unwrap().is_awaiting_upstream());
    }
}

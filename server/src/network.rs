//! Server network layer: one event loop multiplexing every TCP connection

use crate::connection_manager::{ConnectionId, ConnectionManager};
use crate::dispatcher::{complete, dispatch, Dispatch, ServerContext};
use crate::error::ConnectionFault;
use crate::game::GameController;
use crate::outbound::OutboundQueue;
use crate::worker::{Completion, WorkerPool};
use log::{debug, error, info, warn};
use shared::{decode_frame, MAX_MSG_LENGTH};
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub max_connections: usize,
    /// Upstream requests allowed to run at the same time.
    pub workers: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Everything that became ready during one wait.
#[derive(Default)]
struct Readiness {
    accepted: Vec<(TcpStream, SocketAddr)>,
    accept_error: Option<io::Error>,
    readable: Vec<ConnectionId>,
    writable: Vec<ConnectionId>,
    completions: Vec<Completion>,
}

impl Readiness {
    fn is_empty(&self) -> bool {
        self.accepted.is_empty()
            && self.accept_error.is_none()
            && self.readable.is_empty()
            && self.writable.is_empty()
            && self.completions.is_empty()
    }
}

/// What a read left the connection in.
enum ReadOutcome {
    Open,
    LoggedOut,
}

/// Trivia server accepting clients and serving their requests
pub struct Server {
    listener: TcpListener,
    connections: ConnectionManager,
    context: ServerContext,
    workers: WorkerPool,
    completions: mpsc::UnboundedReceiver<Completion>,
    recv_buffer: Vec<u8>,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        controller: GameController,
        options: ServerOptions,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "Server listening on {} with {} questions",
            listener.local_addr()?,
            controller.pool().len()
        );

        let (workers, completions) = WorkerPool::new(controller, options.workers);
        info!(
            "Accepting up to {} connections with {} upstream workers",
            options.max_connections,
            workers.size()
        );

        Ok(Server {
            listener,
            connections: ConnectionManager::new(options.max_connections),
            context: ServerContext::new(),
            workers,
            completions,
            recv_buffer: vec![0u8; MAX_MSG_LENGTH],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connections currently registered with the loop.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections currently logged in.
    pub fn session_count(&self) -> usize {
        self.context.sessions.len()
    }

    /// Runs the event loop forever.
    ///
    /// Each iteration waits until the listener, a connection or the worker
    /// pool is ready, then handles accepts, reads, completions and writes in
    /// that order.
    pub async fn run(&mut self) {
        loop {
            let ready = poll_fn(|cx| {
                poll_readiness(
                    cx,
                    &self.listener,
                    &self.connections,
                    &self.context.outbound,
                    &mut self.completions,
                )
            })
            .await;

            for (stream, addr) in ready.accepted {
                self.accept(stream, addr);
            }

            for id in ready.readable {
                match self.read_from(id) {
                    Ok(ReadOutcome::Open) => {}
                    Ok(ReadOutcome::LoggedOut) => {
                        info!("Connection {} logged out", id);
                        self.close(id, None);
                    }
                    Err(fault) => self.close(id, Some(fault)),
                }
            }

            for completion in ready.completions {
                self.apply_completion(completion);
            }

            for id in ready.writable {
                if let Err(fault) = self.write_to(id) {
                    self.close(id, Some(fault));
                }
            }

            if let Some(e) = ready.accept_error {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }
        self.connections.add_connection(stream, addr);
    }

    /// Reads one frame from `id` and dispatches it.
    fn read_from(&mut self, id: ConnectionId) -> Result<ReadOutcome, ConnectionFault> {
        let Some(connection) = self.connections.get_mut(id) else {
            return Ok(ReadOutcome::Open);
        };

        let count = match connection.stream.try_read(&mut self.recv_buffer) {
            Ok(0) => return Err(ConnectionFault::Closed),
            Ok(count) => count,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Open),
            Err(e) => return Err(e.into()),
        };

        let (command, payload) = decode_frame(&self.recv_buffer[..count])?;
        match dispatch(&mut self.context, id, command, &payload) {
            Dispatch::Replied => {}
            Dispatch::Deferred(request) => {
                connection.set_awaiting_upstream(true);
                self.workers.submit(id, request);
            }
            Dispatch::Disconnect => return Ok(ReadOutcome::LoggedOut),
        }
        Ok(ReadOutcome::Open)
    }

    fn apply_completion(&mut self, completion: Completion) {
        let id = completion.connection;
        let Some(connection) = self.connections.get_mut(id) else {
            debug!("Dropping completion for closed connection {}", id);
            return;
        };
        connection.set_awaiting_upstream(false);

        if let Err(e) = complete(&mut self.context, id, completion.result) {
            self.close(id, Some(e.into()));
        }
    }

    /// Writes the head of the outbound queue of `id`. A short write leaves
    /// the remainder at the head.
    fn write_to(&mut self, id: ConnectionId) -> Result<(), ConnectionFault> {
        let Some(connection) = self.connections.get(id) else {
            return Ok(());
        };
        let Some(pending) = self.context.outbound.front_mut(id) else {
            return Ok(());
        };

        match connection.stream.try_write(pending.remaining()) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(count) => {
                if pending.advance(count) {
                    self.context.outbound.pop_front(id);
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Tears a connection down: the stream first, then its session, then any
    /// output still queued for it.
    fn close(&mut self, id: ConnectionId, fault: Option<ConnectionFault>) {
        let Some(connection) = self.connections.remove_connection(id) else {
            return;
        };

        match fault {
            None => {}
            Some(ConnectionFault::Closed) => info!(
                "Connection {} from {} closed after {:.1}s",
                id,
                connection.addr,
                connection.age().as_secs_f32()
            ),
            Some(ConnectionFault::Frame(_)) => {
                warn!("Connection {} sent a malformed frame, closing", id)
            }
            Some(ConnectionFault::Io(e)) => warn!("Connection {} failed: {}", id, e),
            Some(ConnectionFault::Upstream(e)) => {
                error!("Upstream failure on connection {}: {}", id, e)
            }
        }

        drop(connection);
        self.context.forget(id);

        if self.connections.is_empty() {
            info!("All clients disconnected");
        } else {
            debug!(
                "{} connections open, {} logged in",
                self.connection_count(),
                self.session_count()
            );
        }
    }
}

/// Single readiness wait over the listener, every connection and the
/// completion channel. Registers wakers for everything still pending.
fn poll_readiness(
    cx: &mut Context<'_>,
    listener: &TcpListener,
    connections: &ConnectionManager,
    outbound: &OutboundQueue,
    completions: &mut mpsc::UnboundedReceiver<Completion>,
) -> Poll<Readiness> {
    let mut ready = Readiness::default();

    loop {
        match listener.poll_accept(cx) {
            Poll::Ready(Ok(accepted)) => ready.accepted.push(accepted),
            Poll::Ready(Err(e)) => {
                ready.accept_error = Some(e);
                break;
            }
            Poll::Pending => break,
        }
    }

    for connection in connections.iter() {
        // Not read while a request is upstream, so replies keep request order.
        if !connection.is_awaiting_upstream() && connection.stream.poll_read_ready(cx).is_ready()
        {
            ready.readable.push(connection.id);
        }
        if outbound.has_pending(connection.id) && connection.stream.poll_write_ready(cx).is_ready()
        {
            ready.writable.push(connection.id);
        }
    }

    while let Poll::Ready(Some(completion)) = completions.poll_recv(cx) {
        ready.completions.push(completion);
    }

    if ready.is_empty() {
        Poll::Pending
    } else {
        Poll::Ready(ready)
    }
}

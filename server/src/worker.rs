//! Bounded pool running user-store requests off the event loop.

use crate::connection_manager::ConnectionId;
use crate::error::{HandlerError, UpstreamError};
use crate::game::{GameController, Response, UpstreamRequest};
use log::debug;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Result of one upstream request, addressed to the connection that sent it.
#[derive(Debug)]
pub struct Completion {
    pub connection: ConnectionId,
    pub result: Result<Response, HandlerError>,
}

pub struct WorkerPool {
    controller: GameController,
    permits: Arc<Semaphore>,
    completions: mpsc::UnboundedSender<Completion>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool running at most `size` requests at once, together with
    /// the receiving end the event loop drains completions from.
    pub fn new(
        controller: GameController,
        size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let size = size.max(1);
        let (completions, receiver) = mpsc::unbounded_channel();
        let pool = Self {
            controller,
            permits: Arc::new(Semaphore::new(size)),
            completions,
            size,
        };
        (pool, receiver)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues `request`. Its completion arrives on the receiver even if the
    /// worker panics.
    pub fn submit(&self, connection: ConnectionId, request: UpstreamRequest) {
        let controller = self.controller.clone();
        let permits = Arc::clone(&self.permits);
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(permit) => {
                    let outcome = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        controller.execute(request)
                    })
                    .await;
                    outcome.unwrap_or_else(|e| Err(UpstreamError::Worker(e.to_string()).into()))
                }
                Err(_) => Err(UpstreamError::Worker("worker pool closed".to_string()).into()),
            };

            if completions.send(Completion { connection, result }).is_err() {
                debug!("Event loop gone, dropping completion for {}", connection);
            }
        });
    }
}

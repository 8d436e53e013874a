//! Registry of live client connections and broadcast fan-out.
//!
//! A connection is in the registry from the moment it is attached until its
//! serving loop exits, on every exit path.  All iteration happens over a
//! snapshot, so links may come and go while a broadcast is in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use columbus_core::{CloseReason, Frame};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::application::link::{ClientLink, LinkError};
use crate::domain::ConnectionId;

type LinkMap = HashMap<ConnectionId, Arc<dyn ClientLink>>;

/// Cloneable handle to the shared connection table.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    links: Arc<Mutex<LinkMap>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `link`, replacing any previous entry with the same id.
    pub fn insert(&self, link: Arc<dyn ClientLink>) {
        let id = link.id();
        self.lock().insert(id, link);
        debug!("connection {id} registered");
    }

    /// Removes the link with `id`.  Returns it if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<dyn ClientLink>> {
        let removed = self.lock().remove(&id);
        if removed.is_some() {
            debug!("connection {id} removed from registry");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current link set.
    pub fn snapshot(&self) -> Vec<Arc<dyn ClientLink>> {
        self.lock().values().cloned().collect()
    }

    /// Sends `frame` to every registered connection.
    ///
    /// The frame is encoded once and one send task is spawned per link, so a
    /// slow client never delays the others.  A link that reports
    /// [`LinkError::Closed`] is dropped from the registry.
    pub fn broadcast(&self, frame: &Frame) -> Broadcast {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("cannot encode broadcast frame (op {}): {e}", frame.op.value());
                return Broadcast::default();
            }
        };

        let tasks = self
            .snapshot()
            .into_iter()
            .map(|link| {
                let registry = self.clone();
                let text = text.clone();
                tokio::spawn(async move {
                    match link.send_text(text).await {
                        Ok(()) => true,
                        Err(LinkError::Closed) => {
                            registry.remove(link.id());
                            false
                        }
                        Err(e) => {
                            warn!("broadcast to connection {} failed: {e}", link.id());
                            false
                        }
                    }
                })
            })
            .collect();

        Broadcast { tasks }
    }

    /// Closes every registered connection with `reason` and waits for the
    /// close frames to go out.
    pub async fn close_all(&self, reason: CloseReason) {
        let links = self.snapshot();
        debug!("closing {} connection(s): {reason}", links.len());
        futures_util::future::join_all(links.iter().map(|link| link.close(reason))).await;
    }

    fn lock(&self) -> MutexGuard<'_, LinkMap> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-flight broadcast.  Dropping it leaves the sends running.
#[derive(Debug, Default)]
pub struct Broadcast {
    tasks: Vec<JoinHandle<bool>>,
}

/// Result of a completed broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl Broadcast {
    /// Number of connections the frame was sent to.
    pub fn recipients(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every send to finish.
    pub async fn wait(self) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for task in self.tasks {
            match task.await {
                Ok(true) => report.delivered += 1,
                _ => report.failed += 1,
            }
        }
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

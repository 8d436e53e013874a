//! In-process event dispatch bus.
//!
//! Maps an event name to the ordered list of [`Listener`]s registered for it.
//! Inbound `Dispatch` frames, the hub's own `connect`/`disconnect` lifecycle
//! events, and module-internal events all flow through [`EventBus::dispatch`].
//!
//! # Dispatch rules
//!
//! 1. The listener list of the event is copied before any handler runs, so a
//!    handler that registers or deregisters listeners never disturbs the
//!    in-flight dispatch.
//! 2. Listeners run in registration order.  A synchronous handler that fails
//!    or panics is logged and skipped; the next listener still runs.
//! 3. Asynchronous handlers are spawned and never awaited by the bus.  A
//!    supervisor logs their failure or panic.
//! 4. One-time listeners from the snapshot are removed afterwards, if they are
//!    still present.
//!
//! The bus is generic over the context `C` handed to every handler, which
//! keeps it independent of the hub and trivially testable.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::application::listener::{HandlerFuture, Invocation, Listener};

/// Outcome of one [`EventBus::dispatch`] call.
///
/// Dropping it detaches the spawned handler tasks (fire-and-forget).
#[derive(Debug, Default)]
pub struct Dispatched {
    /// Listeners whose handler was invoked without a synchronous fault.
    pub invoked: usize,
    /// Listeners whose handler failed or panicked synchronously.
    pub faulted: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatched {
    /// Number of handler tasks spawned by this dispatch.
    pub fn spawned(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every spawned handler task to finish.
    pub async fn settle(self) {
        for task in self.tasks {
            // Handler failures are already logged by the supervisor.
            let _ = task.await;
        }
    }
}

/// Event name → ordered listeners.
pub struct EventBus<C> {
    table: Mutex<HashMap<String, Vec<Listener<C>>>>,
}

impl<C> EventBus<C>
where
    C: Clone + Send + 'static,
{
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Appends `listener` to its event's list.
    pub fn register(&self, listener: Listener<C>) {
        debug!("registering listener for \"{}\"", listener.event());
        self.lock()
            .entry(listener.event().to_string())
            .or_default()
            .push(listener);
    }

    /// Removes the first entry equal to `listener`.
    ///
    /// Returns `false` (not an error) if it was not registered.
    pub fn deregister(&self, listener: &Listener<C>) -> bool {
        let mut table = self.lock();
        let Some(list) = table.get_mut(listener.event()) else {
            return false;
        };
        let Some(pos) = list.iter().position(|l| l == listener) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            table.remove(listener.event());
        }
        true
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one listener, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.lock().keys().cloned().collect();
        events.sort();
        events
    }

    /// Invokes every listener of `event` with a clone of `ctx`.
    ///
    /// Must be called from within a tokio runtime when asynchronous
    /// listeners may be registered.  Dispatching an event nobody listens to
    /// is a no-op.
    pub fn dispatch(&self, event: &str, ctx: C) -> Dispatched {
        let snapshot: Vec<Listener<C>> = match self.lock().get(event) {
            Some(list) => list.clone(),
            None => return Dispatched::default(),
        };

        let mut outcome = Dispatched::default();
        for listener in &snapshot {
            let call = std::panic::catch_unwind(AssertUnwindSafe(|| listener.invoke(ctx.clone())));
            match call {
                Ok(Ok(Invocation::Complete)) => outcome.invoked += 1,
                Ok(Ok(Invocation::Spawn(future))) => {
                    outcome.invoked += 1;
                    outcome.tasks.push(tokio::spawn(supervise(event.to_string(), future)));
                }
                Ok(Err(e)) => {
                    outcome.faulted += 1;
                    warn!("listener for \"{event}\" failed: {e}");
                }
                Err(_) => {
                    outcome.faulted += 1;
                    error!("listener for \"{event}\" panicked");
                }
            }
        }

        for listener in snapshot.iter().filter(|l| l.is_onetime()) {
            self.deregister(listener);
        }

        outcome
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener<C>>>> {
        // Handlers never run under this lock; a poisoned table is still consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> Default for EventBus<C>
where
    C: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Reference-counted set of event names clients are allowed to dispatch.
///
/// Two modules may advertise the same event; it stays advertised until both
/// withdraw it.
#[derive(Debug, Default)]
pub struct AdvertisedEvents {
    counts: Mutex<HashMap<String, usize>>,
}

impl AdvertisedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertises `event`.  Returns `true` if it was not advertised before.
    pub fn register(&self, event: &str) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(event.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Withdraws one advertisement of `event`.  Returns `true` once the last
    /// advertisement is gone; withdrawing an unknown event is a no-op.
    pub fn unregister(&self, event: &str) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        match counts.get_mut(event) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(event);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, event: &str) -> bool {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event)
    }

    /// Advertised names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Runs a spawned handler and logs its failure.
async fn supervise(event: String, future: HandlerFuture) {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("async listener for \"{event}\" failed: {e}"),
        Err(_) => error!("async listener for \"{event}\" panicked"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

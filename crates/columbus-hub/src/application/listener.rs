//! Listener registrations: the execution unit of the event bus.
//!
//! A [`Listener`] binds an event name to a handler plus a one-time flag.  It
//! is immutable once built.  Handlers come in two shapes:
//!
//! - **synchronous** ([`Listener::new`]): runs inline during dispatch;
//! - **spawning** ([`Listener::spawning`]): returns a future that the bus
//!   spawns on the runtime and never awaits (fire-and-forget).
//!
//! Modules declare their listeners once, at construction, through a
//! [`ListenerTable`] builder.  There is no runtime discovery.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::application::link::LinkError;

/// Error type returned by event handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The event payload does not have the shape the handler expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The hardware behind the module refused the command.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Replying to the originating client failed.
    #[error("reply failed: {0}")]
    Reply(#[from] LinkError),

    /// Any other failure inside the handler.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Future produced by a spawning handler.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// What invoking a handler produced.
pub enum Invocation {
    /// The handler ran to completion inline.
    Complete,
    /// The handler returned work to be spawned.
    Spawn(HandlerFuture),
}

type HandlerFn<C> = dyn Fn(C) -> Result<Invocation, HandlerError> + Send + Sync;

/// An `(event, handler, onetime)` binding stored in the event bus.
///
/// Cloning is cheap and clones compare equal: equality is event name, one-time
/// flag and *identity* of the handler allocation.
pub struct Listener<C> {
    event: Arc<str>,
    handler: Arc<HandlerFn<C>>,
    onetime: bool,
}

impl<C: 'static> Listener<C> {
    /// Builds a listener around a synchronous handler.
    pub fn new<F>(event: &str, handler: F) -> Self
    where
        F: Fn(C) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            event: Arc::from(event),
            handler: Arc::new(move |ctx| handler(ctx).map(|()| Invocation::Complete)),
            onetime: false,
        }
    }

    /// Builds a listener around an asynchronous handler.
    ///
    /// The handler itself is called inline; the future it returns is spawned.
    pub fn spawning<F, Fut>(event: &str, handler: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            event: Arc::from(event),
            handler: Arc::new(move |ctx| -> Result<Invocation, HandlerError> {
                Ok(Invocation::Spawn(Box::pin(handler(ctx))))
            }),
            onetime: false,
        }
    }

    /// Marks the listener as one-time: the bus drops it after its first dispatch.
    pub fn once(mut self) -> Self {
        self.onetime = true;
        self
    }

    /// Event name this listener is bound to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// `true` if the listener is removed after its first dispatch.
    pub fn is_onetime(&self) -> bool {
        self.onetime
    }

    /// Calls the handler.
    ///
    /// # Errors
    ///
    /// Propagates the error of a synchronous handler.
    pub fn invoke(&self, ctx: C) -> Result<Invocation, HandlerError> {
        (self.handler)(ctx)
    }
}

impl<C> Clone for Listener<C> {
    fn clone(&self) -> Self {
        Self {
            event: Arc::clone(&self.event),
            handler: Arc::clone(&self.handler),
            onetime: self.onetime,
        }
    }
}

impl<C> PartialEq for Listener<C> {
    fn eq(&self, other: &Self) -> bool {
        self.event == other.event
            && self.onetime == other.onetime
            && Arc::ptr_eq(&self.handler, &other.handler)
    }
}

impl<C> Eq for Listener<C> {}

impl<C> fmt::Debug for Listener<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("event", &self.event)
            .field("onetime", &self.onetime)
            .finish_non_exhaustive()
    }
}

/// Ordered, statically declared set of listeners a module wants registered
/// while it is loaded.
pub struct ListenerTable<C> {
    listeners: Vec<Listener<C>>,
}

impl<C: 'static> ListenerTable<C> {
    /// Starts an empty table.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Adds a synchronous handler for `event`.
    pub fn on<F>(self, event: &str, handler: F) -> Self
    where
        F: Fn(C) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.with(Listener::new(event, handler))
    }

    /// Adds an asynchronous handler for `event`.
    pub fn on_async<F, Fut>(self, event: &str, handler: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.with(Listener::spawning(event, handler))
    }

    /// Adds a prebuilt listener.
    pub fn with(mut self, listener: Listener<C>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Distinct event names, in declaration order.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = Vec::new();
        for listener in &self.listeners {
            if !events.iter().any(|e| e == listener.event()) {
                events.push(listener.event().to_string());
            }
        }
        events
    }

    /// Number of listeners in the table.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// `true` if the table declares nothing.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Consumes the table.
    pub fn into_listeners(self) -> Vec<Listener<C>> {
        self.listeners
    }
}

impl<C: 'static> Default for ListenerTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

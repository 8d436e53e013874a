//! The hub: the controller every other component talks to.
//!
//! [`Hub`] composes the connection registry, the event bus, the advertised
//! event set, the per-module state store, the HTTP route table and the module
//! manager.  Capability modules reach the outside world only through the
//! methods defined here.
//!
//! # Connection flow
//!
//! ```text
//! attach(link)      send Hello → insert into registry → catch up → emit "connect"
//! route_inbound()   client Dispatch → event bus (fault isolated)
//! detach(reg)       remove from registry → emit "disconnect"
//! ```
//!
//! # Outbound flow
//!
//! ```text
//! state_update("vehicle", {speed: 50})
//!   → merge into the module's state
//!   → broadcast {op: 0, d: {t: "vehicle", p: <full state>}} to every client
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use columbus_core::{CloseReason, Frame, HelloPayload};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::event_bus::{AdvertisedEvents, Dispatched, EventBus};
use crate::application::lifecycle::{ModuleManager, TickReport};
use crate::application::link::{ClientLink, LinkError};
use crate::application::listener::{HandlerError, Listener};
use crate::application::module::{CapabilityModule, ModuleError};
use crate::application::registry::{Broadcast, ConnectionRegistry};
use crate::domain::{ConnectionId, HttpMethod, HttpRoute, HubConfig, RouteError, RouteTable};

/// Emitted by the hub after a client is attached.  Never routable from clients.
pub const CONNECT_EVENT: &str = "connect";

/// Emitted by the hub after a client is detached.  Never routable from clients.
pub const DISCONNECT_EVENT: &str = "disconnect";

/// Everything a listener receives.
#[derive(Clone)]
pub struct EventContext {
    /// The hub, for replies, broadcasts and state updates.
    pub hub: Arc<Hub>,
    /// The client that sent the event; `None` for hub-internal events.
    pub origin: Option<Arc<dyn ClientLink>>,
    /// Event name as dispatched.
    pub event: Arc<str>,
    /// Event payload (`{}` when the client sent none).
    pub payload: Value,
}

impl EventContext {
    /// Deserializes the payload into `T`.
    ///
    /// # Errors
    ///
    /// [`HandlerError::InvalidPayload`] if the payload does not fit `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(format!("{}: {e}", self.event)))
    }

    /// Sends `frame` to the originating client only.  No-op without an origin.
    pub async fn reply(&self, frame: &Frame) -> Result<(), HandlerError> {
        match &self.origin {
            Some(link) => Ok(link.send_frame(frame).await?),
            None => Ok(()),
        }
    }
}

/// Per-module state mappings, keyed by module name.
#[derive(Debug, Default)]
struct StateStore {
    states: Mutex<BTreeMap<String, Map<String, Value>>>,
}

impl StateStore {
    /// Merges `partial` into `module`'s state and returns the full result.
    fn merge(&self, module: &str, partial: Map<String, Value>) -> Map<String, Value> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(module.to_string()).or_default();
        state.extend(partial);
        state.clone()
    }

    fn get(&self, module: &str) -> Option<Map<String, Value>> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
    }

    fn remove(&self, module: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(module);
    }
}

/// Result of [`Hub::tick`].
#[derive(Debug)]
pub struct TickOutcome {
    pub report: TickReport,
    /// The `ModulesUpdate` broadcast, if the loaded set changed.
    pub broadcast: Option<Broadcast>,
}

/// Keeps a client in the registry while alive.
///
/// Dropping it removes the client, on every exit path of the serving loop.
pub struct Registration {
    hub: Arc<Hub>,
    link: Arc<dyn ClientLink>,
    connect: Option<Dispatched>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.link.id()
    }

    /// Waits until the `connect` listeners spawned by [`Hub::attach`] finish.
    pub async fn connected(&mut self) {
        if let Some(dispatched) = self.connect.take() {
            dispatched.settle().await;
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.registry.remove(self.link.id());
    }
}

/// The controller shared by the server, every connection and every module.
pub struct Hub {
    config: HubConfig,
    registry: ConnectionRegistry,
    bus: EventBus<EventContext>,
    advertised: AdvertisedEvents,
    states: StateStore,
    routes: Mutex<RouteTable>,
    modules: ModuleManager,
    shutting_down: watch::Sender<bool>,
}

impl Hub {
    /// Builds a hub around `modules`.  No module is loaded until the first
    /// [`Hub::tick`].
    ///
    /// # Errors
    ///
    /// [`ModuleError::DuplicateName`] if two modules share a name.
    pub fn new(
        config: HubConfig,
        modules: Vec<Arc<dyn CapabilityModule>>,
    ) -> Result<Arc<Self>, ModuleError> {
        let modules = ModuleManager::new(modules)?;
        Ok(Arc::new(Self {
            config,
            registry: ConnectionRegistry::new(),
            bus: EventBus::new(),
            advertised: AdvertisedEvents::new(),
            states: StateStore::default(),
            routes: Mutex::new(RouteTable::new()),
            modules,
            shutting_down: watch::Sender::new(false),
        }))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    // ── Module-facing API ─────────────────────────────────────────────────────

    /// Advertises `event` as routable from clients.
    pub fn register_event(&self, event: &str) {
        if self.advertised.register(event) {
            debug!("event \"{event}\" advertised");
        }
    }

    /// Withdraws one advertisement of `event`.
    pub fn unregister_event(&self, event: &str) {
        if self.advertised.unregister(event) {
            debug!("event \"{event}\" withdrawn");
        }
    }

    /// Event names currently advertised, sorted.
    pub fn advertised_events(&self) -> Vec<String> {
        self.advertised.names()
    }

    pub fn add_listener(&self, listener: Listener<EventContext>) {
        self.bus.register(listener);
    }

    /// Returns `false` if `listener` was not registered.
    pub fn remove_listener(&self, listener: &Listener<EventContext>) -> bool {
        self.bus.deregister(listener)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.bus.listener_count(event)
    }

    /// Broadcasts a `Dispatch` frame for `event` to every client.
    pub fn dispatch(&self, event: &str, payload: Value) -> Broadcast {
        self.registry.broadcast(&Frame::dispatch(event, payload))
    }

    /// Merges `partial` into `module`'s state and broadcasts the full state
    /// as a `Dispatch` named after the module.
    pub fn state_update(&self, module: &str, partial: Map<String, Value>) -> Broadcast {
        let state = self.states.merge(module, partial);
        self.dispatch(module, Value::Object(state))
    }

    /// Current state of `module`, if it has published any.
    pub fn module_state(&self, module: &str) -> Option<Value> {
        self.states.get(module).map(Value::Object)
    }

    /// Runs every listener of `event` inside the hub.  Nothing is sent to
    /// clients unless a listener does so.
    pub fn emit(
        self: &Arc<Self>,
        event: &str,
        origin: Option<Arc<dyn ClientLink>>,
        payload: Value,
    ) -> Dispatched {
        let ctx = EventContext {
            hub: Arc::clone(self),
            origin,
            event: Arc::from(event),
            payload,
        };
        self.bus.dispatch(event, ctx)
    }

    /// Routes a `Dispatch` received from a client.
    ///
    /// Reserved lifecycle events are dropped, as are non-advertised events
    /// when `restrict_events` is on.
    pub fn route_inbound(
        self: &Arc<Self>,
        origin: Arc<dyn ClientLink>,
        event: &str,
        payload: Value,
    ) -> Dispatched {
        if event == CONNECT_EVENT || event == DISCONNECT_EVENT {
            warn!("connection {}: client sent reserved event \"{event}\"; ignored", origin.id());
            return Dispatched::default();
        }
        if self.config.restrict_events && !self.advertised.contains(event) {
            debug!("connection {}: event \"{event}\" is not advertised; ignored", origin.id());
            return Dispatched::default();
        }
        self.emit(event, Some(origin), payload)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Names of the loaded modules.
    pub fn loaded_modules(&self) -> Vec<String> {
        self.modules.loaded_names()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Runs one lifecycle pass and broadcasts `ModulesUpdate` if the loaded
    /// set changed.
    pub async fn tick(self: &Arc<Self>) -> TickOutcome {
        let report = self.modules.tick(self).await;
        let broadcast = report.changed().then(|| {
            let modules = self.loaded_modules();
            info!("loaded modules: {modules:?}, routes: {:?}", self.mounted_routes());
            self.registry.broadcast(&Frame::modules_update(modules))
        });
        TickOutcome { report, broadcast }
    }

    /// Sends `link` the Hello snapshot, registers it and emits `connect`.
    ///
    /// Hello is always the first frame a client sees: the link joins the
    /// registry only after it is written.  Module or state changes published
    /// in between are then sent to the link directly.
    ///
    /// # Errors
    ///
    /// Returns the send error if the Hello or the catch-up could not be
    /// delivered, and [`LinkError::Closed`] once [`Hub::shutdown`] has begun
    /// (the link is closed with `GoingAway`).  The link is not left in the
    /// registry in either case.
    pub async fn attach(self: &Arc<Self>, link: Arc<dyn ClientLink>) -> Result<Registration, LinkError> {
        if self.is_shutting_down() {
            link.close(CloseReason::GoingAway).await;
            return Err(LinkError::Closed);
        }

        let hello = self.hello_payload();
        link.send_frame(&Frame::hello(&hello)).await?;

        self.registry.insert(Arc::clone(&link));
        let mut registration = Registration {
            hub: Arc::clone(self),
            link: Arc::clone(&link),
            connect: None,
        };
        self.catch_up(link.as_ref(), &hello).await?;

        // Shutdown may have started while the Hello was in flight.
        if self.is_shutting_down() {
            link.close(CloseReason::GoingAway).await;
            return Err(LinkError::Closed);
        }

        info!(
            "connection {} attached ({} open)",
            link.id(),
            self.connection_count()
        );

        registration.connect = Some(self.emit(CONNECT_EVENT, Some(link), Value::Object(Map::new())));
        Ok(registration)
    }

    /// Removes the client held by `registration` and emits `disconnect`.
    pub fn detach(self: &Arc<Self>, registration: Registration) -> Dispatched {
        let link = Arc::clone(&registration.link);
        drop(registration);
        info!(
            "connection {} detached ({} open)",
            link.id(),
            self.connection_count()
        );
        self.emit(DISCONNECT_EVENT, Some(link), Value::Object(Map::new()))
    }

    /// Closes every client with `GoingAway` and unloads every module.
    ///
    /// Clients attaching afterwards are refused.
    pub async fn shutdown(self: &Arc<Self>) {
        info!("shutting down hub");
        self.shutting_down.send_replace(true);
        self.registry.close_all(CloseReason::GoingAway).await;
        let unloaded = self.modules.unload_all(self).await;
        debug!("{unloaded} module(s) unloaded on shutdown");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutting_down.borrow()
    }

    /// Resolves once [`Hub::shutdown`] has begun.
    pub async fn shutdown_started(&self) {
        let mut started = self.shutting_down.subscribe();
        let _ = started.wait_for(|started| *started).await;
    }

    // ── HTTP routes ───────────────────────────────────────────────────────────

    /// Module owning `method path`, if mounted.
    pub fn resolve_route(&self, method: HttpMethod, path: &str) -> Option<String> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(method, path)
            .map(str::to_string)
    }

    /// Absolute paths of every mounted route.
    pub fn mounted_routes(&self) -> Vec<String> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .paths()
    }

    pub(crate) fn mount_routes(&self, module: &str, routes: &[HttpRoute]) -> Result<(), RouteError> {
        if routes.is_empty() {
            return Ok(());
        }
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mount(module, routes)
    }

    pub(crate) fn unmount_routes(&self, module: &str) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unmount(module);
    }

    pub(crate) fn clear_state(&self, module: &str) {
        self.states.remove(module);
    }

    /// Sends `link` whatever changed since `hello` was taken.
    async fn catch_up(&self, link: &dyn ClientLink, hello: &HelloPayload) -> Result<(), LinkError> {
        let modules = self.loaded_modules();
        if modules != hello.modules {
            link.send_frame(&Frame::modules_update(modules.clone())).await?;
        }
        for name in &modules {
            let Some(state) = self.states.get(name).map(Value::Object) else {
                continue;
            };
            if hello.state.get(name) != Some(&state) {
                link.send_frame(&Frame::dispatch(name, state)).await?;
            }
        }
        Ok(())
    }

    fn hello_payload(&self) -> HelloPayload {
        let modules = self.loaded_modules();
        let state = modules
            .iter()
            .filter_map(|name| self.states.get(name).map(|s| (name.clone(), Value::Object(s))))
            .collect();
        HelloPayload {
            modules,
            state,
            heartbeat_interval: u64::try_from(self.config.heartbeat_interval.as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

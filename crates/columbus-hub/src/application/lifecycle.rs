//! Module lifecycle manager.
//!
//! Every tick the manager probes each module, in registration order, and
//! brings its `loaded` flag in line with the probe:
//!
//! ```text
//! available && !loaded  →  load:   register listeners, advertise events,
//!                                  mount routes, loaded = true, on_load()
//! !available && loaded  →  unload: deregister listeners, withdraw events,
//!                                  unmount routes, loaded = false, on_unload()
//! ```
//!
//! A probe that errors or panics counts as "unavailable" for that tick and
//! never stops the other modules from being checked.  Ticks are serialized,
//! so a module is never loaded and unloaded concurrently.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::application::hub::{EventContext, Hub, CONNECT_EVENT, DISCONNECT_EVENT};
use crate::application::listener::Listener;
use crate::application::module::{CapabilityModule, ModuleError};
use crate::domain::HttpRoute;

/// What one lifecycle tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Modules loaded during the tick.
    pub loaded: usize,
    /// Modules unloaded during the tick.
    pub unloaded: usize,
    /// Probe, load or unload failures during the tick.
    pub failed: usize,
}

impl TickReport {
    /// `true` if the loaded-module set changed.
    pub fn changed(&self) -> bool {
        self.loaded + self.unloaded > 0
    }
}

struct ModuleSlot {
    module: Arc<dyn CapabilityModule>,
    name: String,
    listeners: Vec<Listener<EventContext>>,
    events: Vec<String>,
    routes: Vec<HttpRoute>,
    loaded: AtomicBool,
}

/// Owns the registered modules and their `loaded` flags.
pub struct ModuleManager {
    slots: Vec<ModuleSlot>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl ModuleManager {
    /// Takes ownership of `modules` and builds each listener table once.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::DuplicateName`] if two modules share a name.
    pub fn new(modules: Vec<Arc<dyn CapabilityModule>>) -> Result<Self, ModuleError> {
        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(modules.len());

        for module in modules {
            let name = module.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(ModuleError::DuplicateName(name));
            }
            let table = Arc::clone(&module).handlers();
            // Lifecycle events are emitted by the hub, never advertised to clients.
            let events: Vec<String> = table
                .events()
                .into_iter()
                .filter(|e| e != CONNECT_EVENT && e != DISCONNECT_EVENT)
                .collect();
            let routes = module.http_routes();
            debug!(
                "module {name}: {} listener(s) on {events:?}, {} route(s)",
                table.len(),
                routes.len()
            );
            slots.push(ModuleSlot {
                module,
                name,
                listeners: table.into_listeners(),
                events,
                routes,
                loaded: AtomicBool::new(false),
            });
        }

        Ok(Self {
            slots,
            tick_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Names of the loaded modules, in registration order.
    pub fn loaded_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.loaded.load(Ordering::SeqCst))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Runs one availability pass over every module.
    pub async fn tick(&self, hub: &Arc<Hub>) -> TickReport {
        let _serialized = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        for slot in &self.slots {
            let available = match probe(slot).await {
                Ok(available) => available,
                Err(e) => {
                    warn!("{e}; treating as unavailable");
                    report.failed += 1;
                    false
                }
            };
            let loaded = slot.loaded.load(Ordering::SeqCst);

            if available && !loaded {
                match load(slot, hub).await {
                    Ok(()) => report.loaded += 1,
                    Err(e) => {
                        error!("{e}");
                        report.failed += 1;
                    }
                }
            } else if !available && loaded {
                report.unloaded += 1;
                if let Err(e) = unload(slot, hub).await {
                    error!("{e}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Unloads every loaded module.  Returns how many were unloaded.
    pub async fn unload_all(&self, hub: &Arc<Hub>) -> usize {
        let _serialized = self.tick_lock.lock().await;
        let mut unloaded = 0;
        for slot in self.slots.iter().rev() {
            if slot.loaded.load(Ordering::SeqCst) {
                unloaded += 1;
                if let Err(e) = unload(slot, hub).await {
                    error!("{e}");
                }
            }
        }
        unloaded
    }
}

async fn probe(slot: &ModuleSlot) -> Result<bool, ModuleError> {
    match AssertUnwindSafe(slot.module.is_active()).catch_unwind().await {
        Ok(Ok(available)) => Ok(available),
        Ok(Err(e)) => Err(ModuleError::Probe {
            module: slot.name.clone(),
            reason: format!("{e:#}"),
        }),
        Err(_) => Err(ModuleError::Probe {
            module: slot.name.clone(),
            reason: "probe panicked".to_string(),
        }),
    }
}

async fn load(slot: &ModuleSlot, hub: &Arc<Hub>) -> Result<(), ModuleError> {
    let failed = |reason: String| ModuleError::Load {
        module: slot.name.clone(),
        reason,
    };

    if let Err(e) = hub.mount_routes(&slot.name, &slot.routes) {
        return Err(failed(e.to_string()));
    }
    for listener in &slot.listeners {
        hub.add_listener(listener.clone());
    }
    for event in &slot.events {
        hub.register_event(event);
    }
    slot.loaded.store(true, Ordering::SeqCst);

    if let Err(e) = slot.module.on_load(hub).await {
        withdraw(slot, hub);
        return Err(failed(format!("{e:#}")));
    }

    info!("module {} loaded", slot.name);
    Ok(())
}

async fn unload(slot: &ModuleSlot, hub: &Arc<Hub>) -> Result<(), ModuleError> {
    withdraw(slot, hub);
    info!("module {} unloaded", slot.name);

    slot.module
        .on_unload(hub)
        .await
        .map_err(|e| ModuleError::Unload {
            module: slot.name.clone(),
            reason: format!("{e:#}"),
        })
}

/// Removes every registration `load` made and clears `loaded`.
fn withdraw(slot: &ModuleSlot, hub: &Arc<Hub>) {
    for listener in &slot.listeners {
        hub.remove_listener(listener);
    }
    for event in &slot.events {
        hub.unregister_event(event);
    }
    hub.unmount_routes(&slot.name);
    hub.clear_state(&slot.name);
    slot.loaded.store(false, Ordering::SeqCst);
}

/// Re-evaluates module availability every `lifecycle_interval`, forever.
///
/// The caller runs the first tick itself; this loop starts one interval later.
pub async fn run_lifecycle(hub: Arc<Hub>) {
    let period = hub.config().lifecycle_interval;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let outcome = hub.tick().await;
        if outcome.report.changed() || outcome.report.failed > 0 {
            debug!("lifecycle tick: {:?}", outcome.report);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! The capability module contract.
//!
//! A capability module wraps one hardware feature (a camera, a vehicle, ...).
//! The [`ModuleManager`](crate::application::lifecycle::ModuleManager) polls
//! [`CapabilityModule::is_active`] every lifecycle tick and loads or unloads
//! the module when its availability changes.  While loaded, the module's
//! listeners receive events and its HTTP routes are mounted.
//!
//! # Writing a module
//!
//! ```text
//! name()        stable, unique; also the state key broadcast to clients
//! is_active()   probe the hardware; called every tick, forever
//! handlers()    declared once at construction, never re-evaluated
//! on_load()     hardware init, initial announcements
//! on_unload()   release the hardware
//! ```
//!
//! Handlers follow one pattern: apply the payload, update module state with
//! [`Hub::state_update`], which broadcasts the new snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::application::hub::{EventContext, Hub};
use crate::application::listener::ListenerTable;
use crate::domain::HttpRoute;

/// Error type for module lifecycle operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Two modules were registered under the same name.
    #[error("duplicate module name \"{0}\"")]
    DuplicateName(String),

    /// The module could not be loaded; its registrations were rolled back.
    #[error("module {module} failed to load: {reason}")]
    Load { module: String, reason: String },

    /// Teardown failed; the module is unloaded regardless.
    #[error("module {module} failed to unload: {reason}")]
    Unload { module: String, reason: String },

    /// The availability check failed or panicked.
    #[error("module {module} availability check failed: {reason}")]
    Probe { module: String, reason: String },
}

/// A pluggable hardware capability.
#[async_trait]
pub trait CapabilityModule: Send + Sync + 'static {
    /// Stable, unique module name.
    fn name(&self) -> &str;

    /// Whether the hardware behind this module is present right now.
    ///
    /// Blocking probes must be offloaded with `tokio::task::spawn_blocking`.
    async fn is_active(&self) -> anyhow::Result<bool>;

    /// The listeners this module wants registered while loaded.
    ///
    /// Called exactly once, when the module is handed to the manager.
    fn handlers(self: Arc<Self>) -> ListenerTable<EventContext>;

    /// HTTP routes to mount under `/{name}` while loaded.
    fn http_routes(&self) -> Vec<HttpRoute> {
        Vec::new()
    }

    /// Runs after the listeners are registered.
    async fn on_load(&self, _hub: &Arc<Hub>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after the listeners are deregistered.
    async fn on_unload(&self, _hub: &Arc<Hub>) -> anyhow::Result<()> {
        Ok(())
    }
}

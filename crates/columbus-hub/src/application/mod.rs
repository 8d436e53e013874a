//! Application layer: the event bus, the connection registry, the module
//! lifecycle manager and the [`Hub`] that ties them together.
//!
//! Nothing in here touches a socket.  Clients are reached through the
//! [`ClientLink`] trait and hardware through the module implementations.

pub mod event_bus;
pub mod hub;
pub mod lifecycle;
pub mod link;
pub mod listener;
pub mod module;
pub mod registry;

pub use event_bus::{AdvertisedEvents, Dispatched, EventBus};
pub use hub::{EventContext, Hub, Registration, TickOutcome, CONNECT_EVENT, DISCONNECT_EVENT};
pub use lifecycle::{run_lifecycle, ModuleManager, TickReport};
pub use link::{ClientLink, LinkError};
pub use listener::{HandlerError, HandlerFuture, Invocation, Listener, ListenerTable};
pub use module::{CapabilityModule, ModuleError};
pub use registry::{Broadcast, ConnectionRegistry, DeliveryReport};

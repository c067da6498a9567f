//! Two-phase event dispatch.
//!
//! An inbound path is resolved by the [`EventBroker`] to an event class, the
//! root event is seeded into a request-scoped `DispatchQueue`, and the
//! [`Dispatcher`] drains control events, then view events, until nothing is
//! pending. Listeners steer the loop through the [`Outcome`] they return:
//! `Interrupt` replaces all pending work with a single event, `Redirect`
//! stops dispatch and hands a URL back to the caller.
//!
//! [`Application`] wires the pieces together for one process: class table,
//! broker populated from an [`EventGateway`] tree, event pool and its reaper.

pub mod application;
pub mod broker;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod persist;
pub mod traits;

pub use application::{Application, RequestOutcome, LISTENER_ID_PARAM};
pub use broker::{EventBroker, SharedBroker};
pub use dispatcher::{DispatchReport, Dispatched, Dispatcher};
pub use error::{BrokerError, DispatchError};
pub use gateway::EventGateway;
pub use persist::{DiscardContext, MemoryContextStore, PersistedContext};
pub use traits::{ContextPersister, Listener, Outcome, Redirect};

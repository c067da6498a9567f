//! Core traits for the dispatch loop.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use barracuda_events::{DispatchQueue, Event};

use crate::persist::PersistedContext;

/// What a listener wants the dispatcher to do next.
#[derive(Debug)]
pub enum Outcome {
    /// Leave the event as it is and move on to the next listener.
    Continue,
    /// Mark the event handled. Later listeners only run if they are
    /// `notify_always`.
    Handled,
    /// Abandon every pending event and dispatch this one instead.
    Interrupt(Event),
    /// Stop dispatching and send the client elsewhere.
    Redirect(Redirect),
}

/// A client-side redirect requested by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    url: String,
    persist_context: bool,
}

impl Redirect {
    pub fn to(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            persist_context: true,
        }
    }

    /// Redirect to the URL that would fire `event` (`Login.event?user=ann`).
    pub fn to_event(event: &Event, use_aliases: bool) -> Self {
        Self::to(event.url(use_aliases))
    }

    /// Skip saving request state for the follow-up request.
    pub fn without_persisted_context(mut self) -> Self {
        self.persist_context = false;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn persists_context(&self) -> bool {
        self.persist_context
    }
}

/// Reacts to events of the classes it is registered for.
///
/// Listeners are shared across concurrent requests; per-request data lives on
/// the event and the queue, never on the listener.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Unique id used for targeting (`$eid`) and deregistration.
    fn id(&self) -> &str;

    /// Run even when an earlier listener already handled the event.
    fn notify_always(&self) -> bool {
        false
    }

    async fn handle_control_event(
        &self,
        event: &mut Event,
        _queue: &mut DispatchQueue,
    ) -> Result<Outcome> {
        tracing::warn!(listener = self.id(), event = event.class_name(), "handle_control_event not implemented");
        Err(anyhow!("listener {} does not handle control events", self.id()))
    }

    async fn handle_view_event(
        &self,
        event: &mut Event,
        _queue: &mut DispatchQueue,
    ) -> Result<Outcome> {
        tracing::warn!(listener = self.id(), event = event.class_name(), "handle_view_event not implemented");
        Err(anyhow!("listener {} does not handle view events", self.id()))
    }
}

/// Saves request state across a client-side redirect so the follow-up
/// request can pick it up.
///
/// Implemented by [`crate::MemoryContextStore`] (tests, single process) and
/// [`crate::DiscardContext`]. Also implemented for `Arc<P>`.
#[async_trait]
pub trait ContextPersister: Send + Sync {
    async fn persist(&self, context: PersistedContext) -> Result<()>;

    /// Take the context saved for `key`, if any. A context is restored once.
    async fn restore(&self, key: &str) -> Result<Option<PersistedContext>>;
}

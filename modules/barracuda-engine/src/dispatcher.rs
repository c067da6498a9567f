//! The two-phase dispatch loop.

use std::sync::{Arc, PoisonError};

use barracuda_common::DispatchConfig;
use barracuda_events::{Category, DispatchQueue, Event, EventSource};
use tracing::{debug, info, warn};

use crate::broker::SharedBroker;
use crate::error::DispatchError;
use crate::persist::PersistedContext;
use crate::traits::{ContextPersister, Listener, Outcome, Redirect};

/// Counters and response status of one dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub interrupts: usize,
    pub requires_response: bool,
    pub response_handled: bool,
}

impl DispatchReport {
    /// A response was required but no view event was handled. The caller
    /// decides what to send instead.
    pub fn is_unanswered(&self) -> bool {
        self.requires_response && !self.response_handled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// The queue drained normally.
    Completed(DispatchReport),
    /// A listener redirected; pending events were discarded.
    Redirected { url: String, report: DispatchReport },
}

impl Dispatched {
    pub fn report(&self) -> &DispatchReport {
        match self {
            Dispatched::Completed(report) => report,
            Dispatched::Redirected { report, .. } => report,
        }
    }
}

enum Signal {
    Interrupt(Event),
    Redirect(Redirect),
}

enum Drained {
    Done,
    Interrupted,
    Redirect(Redirect),
}

/// Drives a [`DispatchQueue`] to completion against a broker's listeners.
///
/// Control events drain first; listeners may queue more control or view
/// events as they run. Once no control event is pending the view events
/// drain. The two passes repeat while anything is pending.
pub struct Dispatcher<P: ContextPersister> {
    broker: SharedBroker,
    persister: P,
    config: DispatchConfig,
}

impl<P: ContextPersister> Dispatcher<P> {
    pub fn new(broker: SharedBroker, persister: P, config: DispatchConfig) -> Self {
        Self {
            broker,
            persister,
            config,
        }
    }

    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    pub fn persister(&self) -> &P {
        &self.persister
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub async fn dispatch(&self, queue: &mut DispatchQueue) -> Result<Dispatched, DispatchError> {
        queue.set_response_handled(false);
        let mut report = DispatchReport {
            requires_response: queue.requires_response(),
            ..DispatchReport::default()
        };

        while queue.has_next_control_event() || queue.has_next_view_event() {
            match self.drain(Category::Control, queue, &mut report).await? {
                Drained::Done => {}
                Drained::Interrupted => continue,
                Drained::Redirect(redirect) => return self.redirect(redirect, queue, report).await,
            }
            match self.drain(Category::View, queue, &mut report).await? {
                Drained::Done | Drained::Interrupted => {}
                Drained::Redirect(redirect) => return self.redirect(redirect, queue, report).await,
            }
        }

        report.response_handled = queue.response_handled();
        if report.is_unanswered() {
            debug!(dispatched = report.dispatched, "No view event handled the response");
        }
        Ok(Dispatched::Completed(report))
    }

    async fn drain(
        &self,
        phase: Category,
        queue: &mut DispatchQueue,
        report: &mut DispatchReport,
    ) -> Result<Drained, DispatchError> {
        loop {
            let next = match phase {
                Category::Control => queue.next_control_event(),
                Category::View => queue.next_view_event(),
            };
            let Some(mut event) = next else {
                return Ok(Drained::Done);
            };

            event.set_extension(self.config.event_extension.as_str());
            report.dispatched += 1;
            debug!(event = event.class_name(), event_id = %event.id(), ?phase, "Dispatching event");

            let listeners = self.listeners_for(&event);
            let signal = match self.notify(phase, &mut event, queue, &listeners).await {
                Ok(signal) => signal,
                Err(e) => {
                    queue.push_processed(event);
                    return Err(e);
                }
            };

            match signal {
                Some(Signal::Interrupt(replacement)) => {
                    report.interrupts += 1;
                    event.set_handled(true);
                    queue.push_processed(event);
                    info!(replacement = replacement.class_name(), "Dispatch interrupted");
                    // Queued even when over the limit so the caller can release it.
                    queue.restart_with(replacement);
                    if report.interrupts > self.config.max_dispatch_depth {
                        return Err(DispatchError::InterruptLimitExceeded {
                            limit: self.config.max_dispatch_depth,
                        });
                    }
                    return Ok(Drained::Interrupted);
                }
                Some(Signal::Redirect(redirect)) => {
                    queue.push_processed(event);
                    return Ok(Drained::Redirect(redirect));
                }
                None => {}
            }

            if phase == Category::View && event.is_handled() {
                queue.set_response_handled(true);
            }

            if !event.is_handled() && event.class().is_exceptional() {
                if let Some(parent) = event.class().parent() {
                    debug!(event = event.class_name(), parent = parent.name(), "Unhandled exceptional event; queueing parent");
                    let fallback = parent
                        .instantiate()
                        .with_source(EventSource::Event(event.to_ref()));
                    queue.add_event(fallback);
                }
            }

            let name = event.class_name().to_string();
            queue.push_processed(event);

            if report.dispatched > self.config.max_dispatch_depth {
                return Err(DispatchError::DepthExceeded {
                    limit: self.config.max_dispatch_depth,
                    event: name,
                });
            }
        }
    }

    /// Run the event past each listener in order. Control-phase failures
    /// abort the run; view-phase failures are logged and skipped.
    async fn notify(
        &self,
        phase: Category,
        event: &mut Event,
        queue: &mut DispatchQueue,
        listeners: &[Arc<dyn Listener>],
    ) -> Result<Option<Signal>, DispatchError> {
        for listener in listeners {
            if event.is_handled() && !listener.notify_always() {
                debug!(listener = listener.id(), event = event.class_name(), "Skipping listener; event already handled");
                continue;
            }

            let result = match phase {
                Category::Control => listener.handle_control_event(event, queue).await,
                Category::View => listener.handle_view_event(event, queue).await,
            };

            match result {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Handled) => event.set_handled(true),
                Ok(Outcome::Interrupt(replacement)) => return Ok(Some(Signal::Interrupt(replacement))),
                Ok(Outcome::Redirect(redirect)) => return Ok(Some(Signal::Redirect(redirect))),
                Err(e) if phase == Category::View => {
                    warn!(
                        listener = listener.id(),
                        event = event.class_name(),
                        error = %e,
                        "View listener failed; skipping its contribution"
                    );
                }
                Err(e) => {
                    return Err(DispatchError::listener(event.class_name(), listener.id(), e));
                }
            }
        }
        Ok(None)
    }

    async fn redirect(
        &self,
        redirect: Redirect,
        queue: &mut DispatchQueue,
        mut report: DispatchReport,
    ) -> Result<Dispatched, DispatchError> {
        queue.remove_unprocessed_events();
        report.response_handled = queue.response_handled();

        if redirect.persists_context() {
            let context = PersistedContext::capture(redirect.url(), queue);
            self.persister
                .persist(context)
                .await
                .map_err(|e| DispatchError::ContextPersist {
                    url: redirect.url().to_string(),
                    source: e.into(),
                })?;
        }

        info!(url = redirect.url(), persisted = redirect.persists_context(), "Redirecting");
        Ok(Dispatched::Redirected {
            url: redirect.url().to_string(),
            report,
        })
    }

    fn listeners_for(&self, event: &Event) -> Vec<Arc<dyn Listener>> {
        self.broker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners_for_event(event)
    }
}

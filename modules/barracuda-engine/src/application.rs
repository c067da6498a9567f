//! One process's dispatch stack, driven one request at a time.
//!
//! `handle` resolves the target to an event class, obtains the root event
//! (from the pool when pooling is on), seeds a fresh queue with it, runs the
//! dispatcher and returns every event instance to the pool afterwards, on
//! success and failure alike.

use std::sync::{Arc, PoisonError};

use barracuda_common::AppConfig;
use barracuda_events::{ClassTable, DispatchQueue, Event, EventPool, EventSnapshot, EventSource, Reaper};
use tracing::{debug, info, warn};

use crate::broker::{EventBroker, SharedBroker};
use crate::dispatcher::{DispatchReport, Dispatched, Dispatcher};
use crate::error::{BrokerError, DispatchError};
use crate::gateway::EventGateway;
use crate::persist::context_key;
use crate::traits::ContextPersister;

/// Request parameter naming listener ids the root event is targeted at.
pub const LISTENER_ID_PARAM: &str = "$eid";

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Completed {
        report: DispatchReport,
        processed: Vec<EventSnapshot>,
    },
    Redirect {
        url: String,
        report: DispatchReport,
    },
    /// The target is not an event request, or names no registered class.
    NotFound { target: String },
}

pub struct Application<P: ContextPersister> {
    config: AppConfig,
    classes: Arc<ClassTable>,
    gateway: EventGateway,
    dispatcher: Dispatcher<P>,
    pool: Option<Arc<EventPool>>,
    reaper: Option<Reaper>,
}

impl<P: ContextPersister> Application<P> {
    /// Build the broker from `gateway` and start the pool reaper.
    ///
    /// `classes` is the same table the gateway's listeners instantiate from,
    /// so every event in a run shares one set of class metadata.
    ///
    /// Must be called inside a Tokio runtime when pooling is enabled.
    pub fn new(
        config: AppConfig,
        classes: Arc<ClassTable>,
        gateway: EventGateway,
        persister: P,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let mut broker = EventBroker::new(Arc::clone(&classes), &config.dispatch);
        let installed = gateway.register(&mut broker);
        info!(classes = classes.len(), interests = installed, "Registered event gateway");

        let (pool, reaper) = if config.pool.enabled {
            let pool = Arc::new(EventPool::new(config.pool.clone(), Arc::clone(&classes)));
            let reaper = pool.spawn_reaper();
            (Some(pool), Some(reaper))
        } else {
            info!("Event pooling disabled");
            (None, None)
        };

        let dispatcher = Dispatcher::new(broker.into_shared(), persister, config.dispatch.clone());

        Ok(Self {
            config,
            classes,
            gateway,
            dispatcher,
            pool,
            reaper,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn classes(&self) -> &Arc<ClassTable> {
        &self.classes
    }

    pub fn broker(&self) -> &SharedBroker {
        self.dispatcher.broker()
    }

    pub fn pool(&self) -> Option<&Arc<EventPool>> {
        self.pool.as_ref()
    }

    pub fn persister(&self) -> &P {
        self.dispatcher.persister()
    }

    /// Dispatch one request target such as `/app/Login.event?user=ann`.
    pub async fn handle(&self, target: &str) -> Result<RequestOutcome, DispatchError> {
        let resolved = {
            let broker = self.broker().read().unwrap_or_else(PoisonError::into_inner);
            if !broker.will_handle(target) {
                None
            } else {
                match broker.resolve(target) {
                    Ok((class, _)) => Some(class),
                    Err(BrokerError::Ambiguous { alias, candidates }) => {
                        warn!(alias = alias.as_str(), ?candidates, "Ambiguous event alias in request");
                        None
                    }
                    Err(_) => None,
                }
            }
        };
        let Some(class) = resolved else {
            debug!(target, "No event for target");
            return Ok(RequestOutcome::NotFound {
                target: target.to_string(),
            });
        };

        let mut root = match &self.pool {
            Some(pool) => pool.checkout(class.name()).await?,
            None => class.instantiate(),
        };
        root.set_source(EventSource::Request {
            target: target.to_string(),
        });

        let mut queue = DispatchQueue::new(true)
            .with_max_chain_depth(self.config.dispatch.max_poly_chain_depth);

        if let Err(e) = self.prepare(&mut root, target).await {
            queue.add_event(root);
            self.release_all(queue);
            return Err(e);
        }

        info!(target, event = root.class_name(), "Dispatching request");
        queue.add_event(root);

        let result = self.dispatcher.dispatch(&mut queue).await;
        let processed: Vec<EventSnapshot> = queue
            .list_processed_events()
            .iter()
            .map(Event::snapshot)
            .collect();
        self.release_all(queue);

        Ok(match result? {
            Dispatched::Completed(report) => {
                if report.is_unanswered() {
                    warn!(target, "Response required but no view event was handled");
                }
                RequestOutcome::Completed { report, processed }
            }
            Dispatched::Redirected { url, report } => RequestOutcome::Redirect { url, report },
        })
    }

    /// Copy query parameters onto the root event, apply `$eid` targeting and
    /// restore context saved by an earlier redirect to this target.
    async fn prepare(&self, root: &mut Event, target: &str) -> Result<(), DispatchError> {
        if let Some((_, query)) = target.split_once('?') {
            let broker = self.broker().read().unwrap_or_else(PoisonError::into_inner);
            let mut params: Vec<(String, Vec<String>)> = Vec::new();
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if key == LISTENER_ID_PARAM {
                    match broker.match_listener_id(&value) {
                        Ok(id) => root.add_listener_id(id),
                        Err(e) => debug!(listener = %value, error = %e, "Ignoring unknown listener target"),
                    }
                    continue;
                }
                match params.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, values)) => values.push(value.into_owned()),
                    None => params.push((key.into_owned(), vec![value.into_owned()])),
                }
            }
            for (key, values) in params {
                root.set_param_values(key, values);
            }
        }

        let key = context_key(target);
        let restored = self
            .persister()
            .restore(&key)
            .await
            .map_err(|e| DispatchError::ContextRestore {
                target: target.to_string(),
                source: e.into(),
            })?;
        if let Some(context) = restored {
            debug!(key = key.as_str(), keys = context.state.len(), "Restoring redirect context");
            for (k, v) in context.state {
                root.put_state(k, v);
            }
        }
        Ok(())
    }

    fn release_all(&self, queue: DispatchQueue) {
        let events = queue.into_events();
        if let Some(pool) = &self.pool {
            let total = events.len();
            let released = events.into_iter().map(|e| pool.release(e)).filter(|r| *r).count();
            debug!(released, total, "Returned events to pool");
        }
    }

    /// Deregister the gateway tree, stop the reaper and drop pooled events.
    pub async fn shutdown(self) {
        {
            let mut broker = self.broker().write().unwrap_or_else(PoisonError::into_inner);
            self.gateway.deregister(&mut broker);
        }
        if let Some(reaper) = self.reaper {
            reaper.shutdown().await;
        }
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
        info!("Application shut down");
    }
}

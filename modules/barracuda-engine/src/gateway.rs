//! A tree of listener interests registered as a unit.
//!
//! Each gateway declares which listeners it provides, which event classes
//! they listen to, and which classes should be resolvable by alias. Calling
//! [`EventGateway::register`] on the root installs the whole tree into a
//! broker; [`EventGateway::deregister`] removes it again at shutdown.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::EventBroker;
use crate::traits::Listener;

struct Interest {
    listener: Arc<dyn Listener>,
    /// `None` registers the listener for targeting only.
    class: Option<String>,
}

pub struct EventGateway {
    name: String,
    interests: Vec<Interest>,
    aliases: Vec<String>,
    children: Vec<EventGateway>,
}

impl EventGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interests: Vec::new(),
            aliases: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listen for events of `class_name`.
    pub fn with_interest(mut self, listener: Arc<dyn Listener>, class_name: impl Into<String>) -> Self {
        self.interests.push(Interest {
            listener,
            class: Some(class_name.into()),
        });
        self
    }

    /// Expose a listener for `$eid` targeting without class interests.
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.interests.push(Interest { listener, class: None });
        self
    }

    /// Make `class_name` resolvable by alias even if nothing listens to it.
    pub fn with_alias(mut self, class_name: impl Into<String>) -> Self {
        self.aliases.push(class_name.into());
        self
    }

    pub fn with_child(mut self, child: EventGateway) -> Self {
        self.add(child);
        self
    }

    pub fn add(&mut self, child: EventGateway) {
        self.children.push(child);
    }

    /// Detach a direct child by name.
    pub fn remove(&mut self, name: &str) -> Option<EventGateway> {
        let pos = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(pos))
    }

    pub fn children(&self) -> &[EventGateway] {
        &self.children
    }

    /// Install this gateway's interests and aliases, then its children's.
    ///
    /// An interest in an unknown class is logged and skipped; it does not
    /// stop the rest of the tree from registering. Returns how many
    /// interests were installed.
    pub fn register(&self, broker: &mut EventBroker) -> usize {
        let mut installed = 0;

        for interest in &self.interests {
            match &interest.class {
                Some(class) => match broker.add_interest(Arc::clone(&interest.listener), class) {
                    Ok(()) => installed += 1,
                    Err(e) => warn!(
                        gateway = self.name.as_str(),
                        listener = interest.listener.id(),
                        error = %e,
                        "Skipping interest"
                    ),
                },
                None => {
                    broker.add_listener(Arc::clone(&interest.listener));
                    installed += 1;
                }
            }
        }

        for class in &self.aliases {
            if let Err(e) = broker.add_event_alias(class) {
                warn!(gateway = self.name.as_str(), error = %e, "Skipping event alias");
            }
        }

        debug!(gateway = self.name.as_str(), installed, "Registered gateway");

        installed
            + self
                .children
                .iter()
                .map(|child| child.register(broker))
                .sum::<usize>()
    }

    /// Remove this gateway's interests, then its children's.
    pub fn deregister(&self, broker: &mut EventBroker) {
        for interest in &self.interests {
            match &interest.class {
                Some(class) => broker.remove_interest(interest.listener.id(), class),
                None => broker.remove_listener(interest.listener.id()),
            }
        }
        debug!(gateway = self.name.as_str(), "Deregistered gateway");
        for child in &self.children {
            child.deregister(broker);
        }
    }
}

impl fmt::Debug for EventGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventGateway")
            .field("name", &self.name)
            .field("interests", &self.interests.len())
            .field("aliases", &self.aliases)
            .field("children", &self.children)
            .finish()
    }
}

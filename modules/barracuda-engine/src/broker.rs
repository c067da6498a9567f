//! Listener registry and request path resolution.
//!
//! Every registered event class and listener id is reachable under each of
//! its dotted suffixes, case-insensitively: `org.app.events.Login` answers to
//! `org.app.events.login`, `app.events.login`, `events.login` and `login`.
//! A suffix shared by two names is ambiguous and matches neither.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use barracuda_common::DispatchConfig;
use barracuda_events::{ClassId, ClassTable, Event, EventClass};
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::traits::Listener;

/// Broker shared between the dispatcher and whoever (de)registers gateways.
pub type SharedBroker = Arc<RwLock<EventBroker>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AliasTarget {
    Unique(String),
    Ambiguous(Vec<String>),
}

#[derive(Default)]
struct AliasIndex {
    entries: HashMap<String, AliasTarget>,
}

impl AliasIndex {
    fn add(&mut self, id: &str, name: &str) {
        for alias in aliases_of(name) {
            let target = match self.entries.remove(&alias) {
                None => AliasTarget::Unique(id.to_string()),
                Some(AliasTarget::Unique(existing)) if existing == id => AliasTarget::Unique(existing),
                Some(AliasTarget::Unique(existing)) => {
                    debug!(alias = alias.as_str(), first = existing.as_str(), second = id, "Alias is now ambiguous");
                    AliasTarget::Ambiguous(vec![existing, id.to_string()])
                }
                Some(AliasTarget::Ambiguous(mut candidates)) => {
                    if !candidates.iter().any(|c| c == id) {
                        candidates.push(id.to_string());
                    }
                    AliasTarget::Ambiguous(candidates)
                }
            };
            self.entries.insert(alias, target);
        }
    }

    fn lookup(&self, name: &str) -> Result<&str, BrokerError> {
        match self.entries.get(&name.to_lowercase()) {
            Some(AliasTarget::Unique(id)) => Ok(id),
            Some(AliasTarget::Ambiguous(candidates)) => Err(BrokerError::Ambiguous {
                alias: name.to_string(),
                candidates: candidates.clone(),
            }),
            None => Err(BrokerError::Unknown(name.to_string())),
        }
    }
}

/// The full name followed by every dotted suffix, lowercased.
fn aliases_of(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let mut aliases = vec![lower.clone()];
    aliases.extend(
        lower
            .match_indices('.')
            .map(|(pos, _)| lower[pos + 1..].to_string())
            .filter(|alias| !alias.is_empty()),
    );
    aliases
}

pub struct EventBroker {
    classes: Arc<ClassTable>,
    extension: String,
    use_aliases: bool,
    listeners: HashMap<String, Arc<dyn Listener>>,
    interests: HashMap<ClassId, Vec<Arc<dyn Listener>>>,
    event_aliases: AliasIndex,
    listener_aliases: AliasIndex,
}

impl EventBroker {
    pub fn new(classes: Arc<ClassTable>, config: &DispatchConfig) -> Self {
        Self {
            classes,
            extension: config.event_extension.clone(),
            use_aliases: config.use_id_aliases,
            listeners: HashMap::new(),
            interests: HashMap::new(),
            event_aliases: AliasIndex::default(),
            listener_aliases: AliasIndex::default(),
        }
    }

    pub fn into_shared(self) -> SharedBroker {
        Arc::new(RwLock::new(self))
    }

    pub fn classes(&self) -> &Arc<ClassTable> {
        &self.classes
    }

    pub fn event_extension(&self) -> &str {
        &self.extension
    }

    // --- registration ------------------------------------------------------------

    /// Register a listener reachable by id only (event targeting).
    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        let id = listener.id().to_string();
        self.listener_aliases.add(&id, &id);
        self.listeners.insert(id, listener);
    }

    /// Register `listener` for events of `class_name`. The class also becomes
    /// resolvable by alias.
    pub fn add_interest(
        &mut self,
        listener: Arc<dyn Listener>,
        class_name: &str,
    ) -> Result<(), BrokerError> {
        let class = self
            .classes
            .get(class_name)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidClass(class_name.to_string()))?;

        debug!(listener = listener.id(), class = class.name(), "Adding event interest");
        self.add_event_alias(class.name())?;
        self.interests
            .entry(Arc::clone(class.id()))
            .or_default()
            .push(Arc::clone(&listener));

        let id = listener.id().to_string();
        self.listener_aliases.add(&id, &id);
        self.listeners.entry(id).or_insert(listener);
        Ok(())
    }

    /// Forget the listener's id. Class interests stay in place.
    pub fn remove_listener(&mut self, listener_id: &str) {
        self.listeners.remove(listener_id);
    }

    /// Drop one class interest and the listener's id.
    pub fn remove_interest(&mut self, listener_id: &str, class_name: &str) {
        if let Some(list) = self.interests.get_mut(class_name) {
            list.retain(|l| l.id() != listener_id);
            if list.is_empty() {
                self.interests.remove(class_name);
            }
        }
        self.listeners.remove(listener_id);
    }

    /// Remove the listener everywhere it is registered.
    pub fn purge_listener(&mut self, listener_id: &str) {
        self.listeners.remove(listener_id);
        self.interests.retain(|_, list| {
            list.retain(|l| l.id() != listener_id);
            !list.is_empty()
        });
    }

    /// Make a class resolvable by its name, its dotted suffixes, and its
    /// event id.
    pub fn add_event_alias(&mut self, class_name: &str) -> Result<(), BrokerError> {
        let class = self
            .classes
            .get(class_name)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidClass(class_name.to_string()))?;
        self.event_aliases.add(class.name(), class.name());
        let event_id = class.event_id(self.use_aliases);
        if event_id != class.name() {
            self.event_aliases.add(class.name(), event_id);
        }
        Ok(())
    }

    // --- lookup ------------------------------------------------------------------

    pub fn listener(&self, id: &str) -> Option<&Arc<dyn Listener>> {
        self.listeners.get(id)
    }

    pub fn listeners_for(&self, class_name: &str) -> &[Arc<dyn Listener>] {
        self.interests
            .get(class_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Listeners an event goes to: its targeted listener ids when any of them
    /// is registered, otherwise every listener interested in its class.
    pub fn listeners_for_event(&self, event: &Event) -> Vec<Arc<dyn Listener>> {
        let targeted: Vec<Arc<dyn Listener>> = event
            .listener_ids()
            .iter()
            .filter_map(|id| self.listener(id).cloned())
            .collect();
        if !targeted.is_empty() {
            return targeted;
        }
        self.listeners_for(event.class_name()).to_vec()
    }

    pub fn match_event_class(&self, name: &str) -> Result<&str, BrokerError> {
        self.event_aliases.lookup(name)
    }

    pub fn match_listener_id(&self, name: &str) -> Result<&str, BrokerError> {
        self.listener_aliases.lookup(name)
    }

    /// True when the request target carries the event extension.
    pub fn will_handle(&self, target: &str) -> bool {
        strip_query(target).ends_with(&self.extension)
    }

    /// Strip directories, query and extension from a request target, then
    /// expand an alias to its full class name. Unmatched names come back as-is.
    pub fn find_event_name(&self, target: &str) -> String {
        let path = strip_query(target);
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let name = name.strip_suffix(self.extension.as_str()).unwrap_or(name);
        match self.match_event_class(name) {
            Ok(full) => full.to_string(),
            Err(BrokerError::Ambiguous { alias, candidates }) => {
                warn!(alias = alias.as_str(), ?candidates, "Ambiguous event alias");
                name.to_string()
            }
            Err(_) => name.to_string(),
        }
    }

    /// Map a request target to its event class.
    pub fn resolve(&self, target: &str) -> Result<(Arc<EventClass>, String), BrokerError> {
        let path = strip_query(target);
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let name = name.strip_suffix(self.extension.as_str()).unwrap_or(name);
        let full = self.match_event_class(name)?.to_string();
        let class = self
            .classes
            .get(&full)
            .cloned()
            .ok_or_else(|| BrokerError::Unknown(full.clone()))?;
        Ok((class, full))
    }

    pub fn instantiate(&self, class: &Arc<EventClass>) -> Event {
        class.instantiate()
    }
}

fn strip_query(target: &str) -> &str {
    target.split_once('?').map(|(path, _)| path).unwrap_or(target)
}

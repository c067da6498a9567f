//! The event instance: class identity, handled flag, timestamp, causal source,
//! and the request payload (parameters and free-form state).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::class::{Category, DedupPolicy, EventClass};

pub const DEFAULT_EXTENSION: &str = ".event";

/// Lightweight pointer to another event: enough to follow a causal chain
/// without owning the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub id: Uuid,
    pub class: String,
}

/// What caused an event to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSource {
    /// The inbound request target that produced the root event.
    Request { target: String },
    /// The more specific event this one was synthesized for.
    Event(EventRef),
}

/// A unit of work travelling through a dispatch queue.
///
/// Instances are never cloned: the id is the instance identity the pool uses
/// to track checkouts.
#[derive(Debug)]
pub struct Event {
    id: Uuid,
    class: Arc<EventClass>,
    handled: bool,
    timestamp: DateTime<Utc>,
    source: Option<EventSource>,
    extension: String,
    listener_ids: Vec<String>,
    params: BTreeMap<String, Vec<String>>,
    state: HashMap<String, serde_json::Value>,
}

impl Event {
    pub fn new(class: Arc<EventClass>) -> Self {
        Self {
            id: Uuid::new_v4(),
            class,
            handled: false,
            timestamp: Utc::now(),
            source: None,
            extension: DEFAULT_EXTENSION.to_string(),
            listener_ids: Vec::new(),
            params: BTreeMap::new(),
            state: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn class(&self) -> &Arc<EventClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn category(&self) -> Category {
        self.class.category()
    }

    pub fn to_ref(&self) -> EventRef {
        EventRef {
            id: self.id,
            class: self.class.name().to_string(),
        }
    }

    // --- handled / timestamp -------------------------------------------------

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Stamp the current time. The pool calls this on every checkout.
    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }

    /// Clear the handled flag and all payload. The pool calls this on release.
    pub fn reset(&mut self) {
        self.handled = false;
        self.source = None;
        self.extension = DEFAULT_EXTENSION.to_string();
        self.listener_ids.clear();
        self.params.clear();
        self.state.clear();
        self.touch();
    }

    // --- source ----------------------------------------------------------------

    pub fn source(&self) -> Option<&EventSource> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, source: EventSource) {
        self.source = Some(source);
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    /// The event this one was synthesized for, if any.
    pub fn source_event(&self) -> Option<&EventRef> {
        match &self.source {
            Some(EventSource::Event(r)) => Some(r),
            _ => None,
        }
    }

    // --- extension / listener targeting --------------------------------------

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn set_extension(&mut self, ext: impl Into<String>) {
        self.extension = ext.into();
    }

    /// Target this event at a specific listener instead of the class registry.
    pub fn add_listener_id(&mut self, id: impl Into<String>) {
        self.listener_ids.push(id.into());
    }

    pub fn listener_ids(&self) -> &[String] {
        &self.listener_ids
    }

    // --- params ----------------------------------------------------------------

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), vec![value.into()]);
    }

    pub fn set_param_values(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.params.insert(key.into(), values);
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(key, value);
        self
    }

    /// First value of a parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn param_values(&self, key: &str) -> Option<&[String]> {
        self.params.get(key).map(Vec::as_slice)
    }

    pub fn params(&self) -> &BTreeMap<String, Vec<String>> {
        &self.params
    }

    // --- state -----------------------------------------------------------------

    pub fn put_state(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.state.insert(key.into(), value.into());
    }

    pub fn state(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    // --- identity / urls -------------------------------------------------------

    /// Whether two events are the same logical unit of work for queue dedup.
    ///
    /// Events of different classes never match. Within a class the class's
    /// [`DedupPolicy`] decides.
    pub fn same_work_as(&self, other: &Event) -> bool {
        if self.id == other.id {
            return true;
        }
        if self.class.name() != other.class.name() {
            return false;
        }
        match self.class.dedup() {
            DedupPolicy::ByClass => true,
            DedupPolicy::ByClassAndParams => self.params == other.params,
            DedupPolicy::ByInstance => false,
        }
    }

    pub fn event_id(&self, use_aliases: bool) -> &str {
        self.class.event_id(use_aliases)
    }

    /// `EventId.ext`, followed by the url-encoded parameters if there are any.
    pub fn url(&self, use_aliases: bool) -> String {
        let mut url = format!("{}{}", self.event_id(use_aliases), self.extension);
        if !self.params.is_empty() {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            for (key, values) in &self.params {
                for value in values {
                    query.append_pair(key, value);
                }
            }
            url.push('?');
            url.push_str(&query.finish());
        }
        url
    }

    pub fn snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            id: self.id,
            class: self.class.name().to_string(),
            category: self.class.category(),
            handled: self.handled,
            timestamp: self.timestamp,
            source: self.source.clone(),
            params: self.params.clone(),
            state: self.state.clone(),
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.same_work_as(other)
    }
}

/// Serializable copy of an event, used for audit and persisted redirect context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub id: Uuid,
    pub class: String,
    pub category: Category,
    pub handled: bool,
    pub timestamp: DateTime<Utc>,
    pub source: Option<EventSource>,
    pub params: BTreeMap<String, Vec<String>>,
    pub state: HashMap<String, serde_json::Value>,
}

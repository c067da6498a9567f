//! Request-scoped pending control/view events plus history.
//!
//! Adding an unhandled event of a polymorphic class also queues one fresh
//! instance per polymorphic ancestor, furthest ancestor first, each sourced
//! from the more specific event. Within a category, adding an event that
//! matches a pending one (per the class's dedup policy) replaces it and moves
//! it to the tail.
//!
//! Popped events are owned by the dispatcher while their listeners run and are
//! handed back through [`DispatchQueue::push_processed`]. Events dropped by
//! dedup or by [`DispatchQueue::remove_unprocessed_events`] are kept aside so
//! the caller can return every instance to the pool at the end of the request.

use std::collections::VecDeque;

use barracuda_common::config::DEFAULT_MAX_POLY_CHAIN_DEPTH;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::class::Category;
use crate::event::{Event, EventSource};

#[derive(Debug)]
pub struct DispatchQueue {
    control: VecDeque<Event>,
    view: VecDeque<Event>,
    processed: Vec<Event>,
    discarded: Vec<Event>,
    requires_response: bool,
    response_handled: bool,
    max_chain_depth: usize,
}

impl DispatchQueue {
    /// `requires_response` is fixed for the life of the queue.
    pub fn new(requires_response: bool) -> Self {
        Self {
            control: VecDeque::new(),
            view: VecDeque::new(),
            processed: Vec::new(),
            discarded: Vec::new(),
            requires_response,
            response_handled: false,
            max_chain_depth: DEFAULT_MAX_POLY_CHAIN_DEPTH,
        }
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    // --- adding ----------------------------------------------------------------

    /// Queue an event and, unless it is already handled, its polymorphic
    /// ancestors. `None` is ignored.
    pub fn add_event(&mut self, event: impl Into<Option<Event>>) {
        let Some(event) = event.into() else {
            return;
        };
        for member in self.expand(event) {
            self.insert(member);
        }
    }

    /// `[furthest ancestor, ..., event]`. Ancestors are collected while each
    /// parent class is polymorphic, fewer than `max_chain_depth` of them.
    fn expand(&self, event: Event) -> Vec<Event> {
        if event.is_handled() {
            return vec![event];
        }

        let mut ancestors: Vec<Event> = Vec::new();
        let mut parent = event.class().parent().cloned();
        let mut source = event.to_ref();

        while let Some(class) = parent {
            if !class.is_polymorphic() {
                break;
            }
            if ancestors.len() + 1 >= self.max_chain_depth {
                warn!(
                    class = event.class_name(),
                    depth = self.max_chain_depth,
                    "Polymorphic chain truncated at max depth"
                );
                break;
            }
            let ancestor = class.instantiate().with_source(EventSource::Event(source));
            source = ancestor.to_ref();
            parent = class.parent().cloned();
            ancestors.push(ancestor);
        }

        ancestors.reverse();
        ancestors.push(event);
        ancestors
    }

    fn insert(&mut self, event: Event) {
        let list = match event.category() {
            Category::Control => &mut self.control,
            Category::View => &mut self.view,
        };

        let mut i = 0;
        while i < list.len() {
            if list[i].same_work_as(&event) {
                if let Some(old) = list.remove(i) {
                    debug!(class = old.class_name(), event_id = %old.id(), "Replacing pending duplicate");
                    self.discarded.push(old);
                }
            } else {
                i += 1;
            }
        }

        debug!(class = event.class_name(), event_id = %event.id(), category = ?event.category(), "Queued event");
        list.push_back(event);
    }

    // --- draining ----------------------------------------------------------------

    pub fn has_next_control_event(&self) -> bool {
        !self.control.is_empty()
    }

    pub fn has_next_view_event(&self) -> bool {
        !self.view.is_empty()
    }

    /// Pop the oldest pending control event. Hand it back with
    /// [`push_processed`](Self::push_processed) once its listeners ran.
    pub fn next_control_event(&mut self) -> Option<Event> {
        self.control.pop_front()
    }

    pub fn next_view_event(&mut self) -> Option<Event> {
        self.view.pop_front()
    }

    pub fn push_processed(&mut self, event: Event) {
        self.processed.push(event);
    }

    // --- interrupt / redirect support -------------------------------------------

    pub fn mark_events_handled(&mut self) {
        for event in self.control.iter_mut().chain(self.view.iter_mut()) {
            event.set_handled(true);
        }
    }

    pub fn remove_unprocessed_events(&mut self) {
        let removed = self.control.len() + self.view.len();
        self.discarded.extend(self.control.drain(..));
        self.discarded.extend(self.view.drain(..));
        if removed > 0 {
            debug!(removed, "Removed unprocessed events");
        }
    }

    /// Abandon everything pending and make `event` the only pending event.
    /// The replacement is queued as-is, without polymorphic expansion.
    pub fn restart_with(&mut self, event: Event) {
        self.mark_events_handled();
        self.remove_unprocessed_events();
        self.insert(event);
    }

    // --- response ------------------------------------------------------------------

    pub fn requires_response(&self) -> bool {
        self.requires_response
    }

    pub fn response_handled(&self) -> bool {
        self.response_handled
    }

    pub fn set_response_handled(&mut self, handled: bool) {
        self.response_handled = handled;
    }

    // --- inspection ----------------------------------------------------------------

    pub fn number_of_events_remaining(&self) -> usize {
        self.control.len() + self.view.len()
    }

    /// Control events first, then view events.
    pub fn list_remaining_events(&self) -> impl Iterator<Item = &Event> {
        self.control.iter().chain(self.view.iter())
    }

    pub fn list_control_events(&self) -> impl Iterator<Item = &Event> {
        self.control.iter()
    }

    pub fn list_view_events(&self) -> impl Iterator<Item = &Event> {
        self.view.iter()
    }

    pub fn number_of_events_processed(&self) -> usize {
        self.processed.len()
    }

    pub fn list_processed_events(&self) -> &[Event] {
        &self.processed
    }

    /// Follow `source` links through the queue's events to the event that
    /// started the chain. Stops at the first link that leaves the queue.
    pub fn root_event_of<'a>(&'a self, event: &'a Event) -> &'a Event {
        let mut current = event;
        // Bounded so a malformed source cycle cannot spin forever.
        for _ in 0..=self.len_all() {
            let Some(source) = current.source_event() else {
                break;
            };
            match self.find(source.id) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    fn find(&self, id: Uuid) -> Option<&Event> {
        self.processed
            .iter()
            .chain(self.control.iter())
            .chain(self.view.iter())
            .find(|event| event.id() == id)
    }

    fn len_all(&self) -> usize {
        self.processed.len() + self.control.len() + self.view.len()
    }

    /// Every event the queue still owns: processed, pending, and those dropped
    /// by dedup or interrupts. Used to return instances to the pool.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = self.processed;
        events.extend(self.control);
        events.extend(self.view);
        events.extend(self.discarded);
        events
    }
}

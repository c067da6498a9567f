//! Statically declared event class hierarchy.
//!
//! A class is registered once, after its parent, so parent links always point
//! at an already-registered class and the hierarchy cannot contain cycles.
//! Category and chaining strategy are inherited from the parent unless the
//! child declares them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ClassError;
use crate::event::Event;

/// Fully-qualified class name, shared cheaply between events.
pub type ClassId = Arc<str>;

/// Hook run on every freshly constructed instance of a class.
pub type Initializer = Arc<dyn Fn(&mut Event) + Send + Sync>;

/// Which dispatch phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Request-side processing. Drained first.
    Control,
    /// Response rendering. Drained once no control events remain.
    View,
}

/// How an event relates to its parent class during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStrategy {
    None,
    /// Adding an unhandled instance also queues one instance per polymorphic
    /// ancestor, furthest ancestor first.
    Polymorphic,
    /// Dispatching an instance that nobody handled queues one instance of the
    /// parent class in its place.
    Exceptional,
}

/// When two pending events of the same class count as the same unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Any two instances of the class collapse into one.
    #[default]
    ByClass,
    /// Instances collapse only when their request parameters match.
    ByClassAndParams,
    /// Nothing collapses except the very same instance.
    ByInstance,
}

/// A registered event class.
pub struct EventClass {
    name: ClassId,
    parent: Option<Arc<EventClass>>,
    category: Category,
    chaining: ChainStrategy,
    dedup: DedupPolicy,
    initializer: Option<Initializer>,
}

impl EventClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &ClassId {
        &self.name
    }

    /// Short alias: the last dotted segment of the name.
    pub fn short_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(pos) => &self.name[pos + 1..],
            None => &self.name,
        }
    }

    /// The id used in event URLs.
    pub fn event_id(&self, use_aliases: bool) -> &str {
        if use_aliases {
            self.short_name()
        } else {
            self.name()
        }
    }

    pub fn parent(&self) -> Option<&Arc<EventClass>> {
        self.parent.as_ref()
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn is_view(&self) -> bool {
        self.category == Category::View
    }

    pub fn is_control(&self) -> bool {
        self.category == Category::Control
    }

    pub fn chaining(&self) -> ChainStrategy {
        self.chaining
    }

    pub fn is_polymorphic(&self) -> bool {
        self.chaining == ChainStrategy::Polymorphic
    }

    pub fn is_exceptional(&self) -> bool {
        self.chaining == ChainStrategy::Exceptional
    }

    pub fn dedup(&self) -> DedupPolicy {
        self.dedup
    }

    /// Parent, grandparent, ... up to the root.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent.as_deref(),
        }
    }

    /// Construct a fresh instance: default state plus the class initializer.
    pub fn instantiate(self: &Arc<Self>) -> Event {
        let mut event = Event::new(Arc::clone(self));
        self.initialize(&mut event);
        event
    }

    /// Apply the class initializer. Recycled instances go through this again
    /// after `reset` so they match a fresh one.
    pub(crate) fn initialize(&self, event: &mut Event) {
        if let Some(init) = &self.initializer {
            init(event);
        }
    }
}

impl fmt::Debug for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventClass")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("category", &self.category)
            .field("chaining", &self.chaining)
            .field("dedup", &self.dedup)
            .finish()
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a EventClass>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a EventClass;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent.as_deref();
        Some(current)
    }
}

/// Declaration of a class before registration.
pub struct EventClassSpec {
    name: String,
    parent: Option<String>,
    category: Option<Category>,
    chaining: Option<ChainStrategy>,
    dedup: DedupPolicy,
    initializer: Option<Initializer>,
}

impl EventClassSpec {
    /// A class whose category is inherited from its parent (control at the root).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            category: None,
            chaining: None,
            dedup: DedupPolicy::default(),
            initializer: None,
        }
    }

    pub fn control(name: impl Into<String>) -> Self {
        Self {
            category: Some(Category::Control),
            ..Self::new(name)
        }
    }

    pub fn view(name: impl Into<String>) -> Self {
        Self {
            category: Some(Category::View),
            ..Self::new(name)
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.chaining = Some(ChainStrategy::Polymorphic);
        self
    }

    pub fn exceptional(mut self) -> Self {
        self.chaining = Some(ChainStrategy::Exceptional);
        self
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_initializer<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut Event) + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(init));
        self
    }
}

/// Registry of every event class known to the application.
#[derive(Default)]
pub struct ClassTable {
    classes: HashMap<ClassId, Arc<EventClass>>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, spec: EventClassSpec) -> Result<Self, ClassError> {
        self.register(spec)?;
        Ok(self)
    }

    /// Register a class. Its parent must already be registered.
    pub fn register(&mut self, spec: EventClassSpec) -> Result<Arc<EventClass>, ClassError> {
        if self.classes.contains_key(spec.name.as_str()) {
            return Err(ClassError::Duplicate(spec.name));
        }

        let parent = match &spec.parent {
            Some(parent_name) => Some(
                self.classes
                    .get(parent_name.as_str())
                    .cloned()
                    .ok_or_else(|| ClassError::UnknownParent {
                        class: spec.name.clone(),
                        parent: parent_name.clone(),
                    })?,
            ),
            None => None,
        };

        let category = match (&parent, spec.category) {
            (Some(p), Some(declared)) if p.category != declared => {
                return Err(ClassError::CategoryConflict {
                    class: spec.name,
                    parent: p.name().to_string(),
                });
            }
            (_, Some(declared)) => declared,
            (Some(p), None) => p.category,
            (None, None) => Category::Control,
        };

        let chaining = match (&parent, spec.chaining) {
            (Some(p), Some(declared))
                if p.chaining != ChainStrategy::None && p.chaining != declared =>
            {
                return Err(ClassError::ChainingConflict {
                    class: spec.name,
                    parent: p.name().to_string(),
                });
            }
            (_, Some(declared)) => declared,
            (Some(p), None) => p.chaining,
            (None, None) => ChainStrategy::None,
        };

        let class = Arc::new(EventClass {
            name: Arc::from(spec.name.as_str()),
            parent,
            category,
            chaining,
            dedup: spec.dedup,
            initializer: spec.initializer,
        });

        tracing::debug!(
            class = class.name(),
            parent = class.parent().map(|p| p.name()),
            category = ?class.category,
            chaining = ?class.chaining,
            "Registered event class"
        );

        self.classes.insert(Arc::clone(&class.name), Arc::clone(&class));
        Ok(class)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EventClass>> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Construct a fresh instance of a registered class.
    pub fn instantiate(&self, name: &str) -> Result<Event, ClassError> {
        self.get(name)
            .map(EventClass::instantiate)
            .ok_or_else(|| ClassError::Unknown(name.to_string()))
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<EventClass>> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Debug for ClassTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.classes.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ClassTable {
        ClassTable::new()
            .with(EventClassSpec::control("app.HttpRequest").polymorphic())
            .unwrap()
            .with(EventClassSpec::new("app.Login").extends("app.HttpRequest"))
            .unwrap()
            .with(EventClassSpec::view("app.Render"))
            .unwrap()
            .with(EventClassSpec::new("app.RenderLogin").extends("app.Render"))
            .unwrap()
    }

    #[test]
    fn children_inherit_category_and_chaining() {
        let table = table();
        let login = table.get("app.Login").unwrap();
        assert!(login.is_control());
        assert!(login.is_polymorphic());
        assert_eq!(login.parent().unwrap().name(), "app.HttpRequest");

        let render_login = table.get("app.RenderLogin").unwrap();
        assert!(render_login.is_view());
        assert_eq!(render_login.chaining(), ChainStrategy::None);
    }

    #[test]
    fn parent_must_exist() {
        let err = ClassTable::new()
            .with(EventClassSpec::new("app.Orphan").extends("app.Missing"))
            .unwrap_err();
        assert!(matches!(err, ClassError::UnknownParent { .. }));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let err = table().with(EventClassSpec::control("app.Login")).unwrap_err();
        assert!(matches!(err, ClassError::Duplicate(name) if name == "app.Login"));
    }

    #[test]
    fn view_child_of_control_rejected() {
        let err = table()
            .with(EventClassSpec::view("app.Weird").extends("app.Login"))
            .unwrap_err();
        assert!(matches!(err, ClassError::CategoryConflict { .. }));
    }

    #[test]
    fn exceptional_child_of_polymorphic_rejected() {
        let err = table()
            .with(EventClassSpec::new("app.Oops").extends("app.Login").exceptional())
            .unwrap_err();
        assert!(matches!(err, ClassError::ChainingConflict { .. }));
    }

    #[test]
    fn short_names_and_ancestry() {
        let table = table();
        let login = table.get("app.Login").unwrap();
        assert_eq!(login.short_name(), "Login");
        assert_eq!(login.event_id(false), "app.Login");
        let names: Vec<_> = login.ancestors().map(|c| c.name()).collect();
        assert_eq!(names, vec!["app.HttpRequest"]);
    }

    #[test]
    fn instantiate_runs_initializer() {
        let table = ClassTable::new()
            .with(
                EventClassSpec::control("app.Search")
                    .with_initializer(|event| event.set_param("page", "1")),
            )
            .unwrap();
        let event = table.instantiate("app.Search").unwrap();
        assert_eq!(event.param("page"), Some("1"));
        assert!(matches!(table.instantiate("app.Nope"), Err(ClassError::Unknown(_))));
    }
}

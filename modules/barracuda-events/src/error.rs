//! Typed errors for class registration and the event pool.

use thiserror::Error;

/// Errors raised while declaring or instantiating event classes.
#[derive(Debug, Error)]
pub enum ClassError {
    #[error("event class already registered: {0}")]
    Duplicate(String),

    #[error("event class {class} extends unregistered class {parent}")]
    UnknownParent { class: String, parent: String },

    #[error("unknown event class: {0}")]
    Unknown(String),

    /// A view class cannot descend from a control class or the reverse.
    #[error("event class {class} declares a different category than its parent {parent}")]
    CategoryConflict { class: String, parent: String },

    /// A class is polymorphic or exceptional, never both.
    #[error("event class {class} declares a different chaining strategy than its parent {parent}")]
    ChainingConflict { class: String, parent: String },
}

/// Errors returned by [`crate::EventPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The requested class is not a registered event class. Not retryable.
    #[error("invalid event class: {0}")]
    InvalidClass(String),

    /// Every instance of the class is checked out and the pool is at capacity.
    /// Back off or raise the pool size.
    #[error("no available events for {class} after {attempts} attempts")]
    NoAvailableEvents { class: String, attempts: u32 },

    #[error("event pool has been shut down")]
    ShutDown,
}

impl PoolError {
    /// Capacity exhaustion is the only condition a caller can wait out.
    pub fn is_capacity(&self) -> bool {
        matches!(self, PoolError::NoAvailableEvents { .. })
    }
}

//! Event model, class table, event pool and dispatch queue.
//!
//! Event classes are declared once at startup in a [`ClassTable`]: each class
//! names its parent, its category (control or view), its chaining strategy and
//! its dedup policy. Everything downstream (the pool's lazily created free
//! lists, the queue's polymorphic expansion) walks those parent links rather
//! than inspecting types at runtime.

pub mod class;
pub mod error;
pub mod event;
pub mod pool;
pub mod queue;

pub use class::{Category, ChainStrategy, ClassId, ClassTable, DedupPolicy, EventClass, EventClassSpec};
pub use error::{ClassError, PoolError};
pub use event::{Event, EventRef, EventSnapshot, EventSource};
pub use pool::{EventPool, PoolStats, Reaper};
pub use queue::DispatchQueue;

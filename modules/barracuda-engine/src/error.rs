use barracuda_common::ConfigError;
use barracuda_events::{ClassError, PoolError};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Registry and path-resolution errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The class or listener name is not registered under any alias.
    #[error("no event class or listener matches {0:?}")]
    Unknown(String),

    /// The alias is a suffix of more than one registered name.
    #[error("alias {alias:?} is ambiguous: {candidates:?}")]
    Ambiguous {
        alias: String,
        candidates: Vec<String>,
    },

    #[error("interest registered for unknown event class {0}")]
    InvalidClass(String),
}

/// Errors surfaced by a dispatch run. Interrupts and redirects are not errors
/// and never appear here.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A control-phase listener failed. Carries the event and listener that
    /// were active.
    #[error("listener {listener} failed while handling {event}")]
    Listener {
        event: String,
        listener: String,
        #[source]
        source: BoxError,
    },

    /// More events were dispatched in one run than the configured depth;
    /// usually listeners re-queueing each other.
    #[error("max dispatch depth {limit} exceeded at {event}; possible recursive dispatch")]
    DepthExceeded { limit: usize, event: String },

    #[error("more than {limit} interrupts in one dispatch run")]
    InterruptLimitExceeded { limit: usize },

    #[error("failed to persist context for redirect to {url}")]
    ContextPersist {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to restore persisted context for {target}")]
    ContextRestore {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Class(#[from] ClassError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl DispatchError {
    pub(crate) fn listener(event: &str, listener: &str, err: anyhow::Error) -> Self {
        Self::Listener {
            event: event.to_string(),
            listener: listener.to_string(),
            source: err.into(),
        }
    }

    /// True for pool backpressure; the request can be retried later.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Pool(e) if e.is_capacity())
    }
}

//! ContextPersister implementations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use barracuda_events::{DispatchQueue, EventSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::ContextPersister;

/// Request state captured at a redirect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedContext {
    /// Key the follow-up request is matched by; see [`context_key`].
    pub key: String,
    pub url: String,
    /// State of every processed event merged in dispatch order; later events
    /// win on conflicting keys.
    pub state: HashMap<String, serde_json::Value>,
    pub processed: Vec<EventSnapshot>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedContext {
    pub fn capture(url: &str, queue: &DispatchQueue) -> Self {
        let processed: Vec<EventSnapshot> = queue
            .list_processed_events()
            .iter()
            .map(|event| event.snapshot())
            .collect();

        let mut state = HashMap::new();
        for snapshot in &processed {
            for (key, value) in &snapshot.state {
                state.insert(key.clone(), value.clone());
            }
        }

        Self {
            key: context_key(url),
            url: url.to_string(),
            state,
            processed,
            saved_at: Utc::now(),
        }
    }
}

/// The last path segment of a URL or request target, query included:
/// `/app/Login.event?x=1` and `Login.event?x=1` share a key.
pub fn context_key(target: &str) -> String {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    let segment = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match query {
        Some(query) => format!("{segment}?{query}"),
        None => segment.to_string(),
    }
}

// ---------------------------------------------------------------------------
// MemoryContextStore (tests, single process)
// ---------------------------------------------------------------------------

/// In-memory context store keyed by [`PersistedContext::key`]. Thread-safe.
///
/// Meant for tests and single-process demos. Nothing expires: a context whose
/// redirect is never followed stays until a later redirect to the same key
/// replaces it, and `history` keeps every context ever saved. Production
/// deployments need a persister with its own eviction.
#[derive(Default)]
pub struct MemoryContextStore {
    contexts: Mutex<HashMap<String, PersistedContext>>,
    history: Mutex<Vec<PersistedContext>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every context ever persisted, oldest first (for test assertions).
    pub fn persisted(&self) -> Vec<PersistedContext> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pending(&self) -> usize {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ContextPersister for MemoryContextStore {
    async fn persist(&self, context: PersistedContext) -> Result<()> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(context.clone());
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.key.clone(), context);
        Ok(())
    }

    async fn restore(&self, key: &str) -> Result<Option<PersistedContext>> {
        Ok(self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key))
    }
}

// ---------------------------------------------------------------------------
// DiscardContext
// ---------------------------------------------------------------------------

/// Persister for deployments without redirect state: drops every context.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardContext;

#[async_trait]
impl ContextPersister for DiscardContext {
    async fn persist(&self, context: PersistedContext) -> Result<()> {
        tracing::debug!(url = context.url.as_str(), "Discarding redirect context");
        Ok(())
    }

    async fn restore(&self, _key: &str) -> Result<Option<PersistedContext>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Arc<P> blanket: tests keep a handle on the store for assertions
// ---------------------------------------------------------------------------

#[async_trait]
impl<P: ContextPersister + ?Sized> ContextPersister for Arc<P> {
    async fn persist(&self, context: PersistedContext) -> Result<()> {
        (**self).persist(context).await
    }

    async fn restore(&self, key: &str) -> Result<Option<PersistedContext>> {
        (**self).restore(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_key_ignores_leading_path() {
        assert_eq!(context_key("/app/Login.event"), "Login.event");
        assert_eq!(context_key("Login.event?user=ann"), "Login.event?user=ann");
        assert_eq!(context_key("/a/b/Login.event?user=ann"), "Login.event?user=ann");
        assert_eq!(context_key("c:\\app\\Login.event"), "Login.event");
    }

    #[tokio::test]
    async fn memory_store_restores_once() {
        let store = MemoryContextStore::new();
        let queue = DispatchQueue::new(false);
        store
            .persist(PersistedContext::capture("Home.event", &queue))
            .await
            .unwrap();

        assert_eq!(store.pending(), 1);
        assert!(store.restore("Home.event").await.unwrap().is_some());
        assert!(store.restore("Home.event").await.unwrap().is_none());
        assert_eq!(store.persisted().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_keeps_unfollowed_contexts_until_replaced() {
        let store = MemoryContextStore::new();
        let queue = DispatchQueue::new(false);
        for url in ["Home.event", "Cart.event", "Home.event"] {
            store
                .persist(PersistedContext::capture(url, &queue))
                .await
                .unwrap();
        }

        assert_eq!(store.pending(), 2);
        assert_eq!(store.persisted().len(), 3);
    }
}

//! Per-class recycling of event instances.
//!
//! Each class gets a free list and a set of checked-out ids, created lazily on
//! the first checkout and guarded by a per-class mutex. A checkout that finds
//! the class at capacity drops the lock, sleeps `retry_interval` and tries
//! again, so a release on another task can unblock it. A background [`Reaper`]
//! reclaims checkouts held longer than `checkout_timeout`.
//!
//! Ownership moves with the event: the caller holds the instance between
//! `checkout` and `release`, the pool only remembers its id and checkout time.
//! A force-released instance is therefore simply forgotten; releasing it later
//! is a no-op.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use barracuda_common::PoolConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::class::{ClassId, ClassTable, EventClass};
use crate::error::PoolError;
use crate::event::Event;

// ---------------------------------------------------------------------------
// EventList (one per class)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EventList {
    free: VecDeque<Event>,
    locked: HashMap<Uuid, Instant>,
}

impl EventList {
    fn lock(&mut self, class: &Arc<EventClass>, capacity: usize) -> Option<Event> {
        if self.free.is_empty() && self.locked.len() >= capacity {
            return None;
        }

        let mut event = match self.free.pop_front() {
            Some(mut event) => {
                class.initialize(&mut event);
                event
            }
            None => {
                debug!(class = class.name(), "Instantiating pooled event");
                class.instantiate()
            }
        };

        event.touch();
        self.locked.insert(event.id(), Instant::now());
        Some(event)
    }

    fn release(&mut self, mut event: Event) -> bool {
        if self.locked.remove(&event.id()).is_none() {
            return false;
        }
        event.reset();
        self.free.push_back(event);
        true
    }

    /// Forget every checkout older than `timeout`. Returns the reclaimed ids.
    fn reap(&mut self, timeout: Duration, now: Instant) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .locked
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.locked.remove(id);
        }
        stale
    }
}

fn lock_list(list: &Mutex<EventList>) -> MutexGuard<'_, EventList> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// EventPool
// ---------------------------------------------------------------------------

/// Free/checked-out counts for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub free: usize,
    pub locked: usize,
}

/// Process-wide pool of event instances, shared across concurrent requests.
pub struct EventPool {
    config: PoolConfig,
    classes: Arc<ClassTable>,
    lists: RwLock<HashMap<ClassId, Arc<Mutex<EventList>>>>,
    /// Set on every checkout/release and while checkouts are outstanding;
    /// the reaper skips its sweep when clear.
    dirty: AtomicBool,
    shut_down: AtomicBool,
}

impl EventPool {
    pub fn new(config: PoolConfig, classes: Arc<ClassTable>) -> Self {
        info!(
            size = config.size,
            timeout_ms = config.checkout_timeout.as_millis() as u64,
            retry_interval_ms = config.retry_interval.as_millis() as u64,
            max_retries = config.max_retries,
            sweep_interval_ms = config.sweep_interval.as_millis() as u64,
            "Instantiating event pool"
        );
        Self {
            config,
            classes,
            lists: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn classes(&self) -> &Arc<ClassTable> {
        &self.classes
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Check out an instance of `class_name`.
    ///
    /// Reuses a free instance, or constructs one while the class is below
    /// capacity. At capacity, retries up to `max_retries` attempts in total,
    /// sleeping `retry_interval` between attempts without holding the class lock.
    pub async fn checkout(&self, class_name: &str) -> Result<Event, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }

        let class = self
            .classes
            .get(class_name)
            .cloned()
            .ok_or_else(|| PoolError::InvalidClass(class_name.to_string()))?;
        let list = self.list_for(&class);
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            let checked_out = lock_list(&list).lock(&class, self.config.size);
            if let Some(event) = checked_out {
                self.dirty.store(true, Ordering::Release);
                debug!(class = class.name(), event_id = %event.id(), attempt, "Checked out event");
                return Ok(event);
            }

            if attempt >= max_attempts {
                warn!(
                    class = class.name(),
                    attempts = attempt,
                    pool_size = self.config.size,
                    "Event pool exhausted; consider raising the pool size"
                );
                return Err(PoolError::NoAvailableEvents {
                    class: class.name().to_string(),
                    attempts: attempt,
                });
            }

            debug!(class = class.name(), attempt, "Waiting for next available event");
            attempt += 1;
            tokio::time::sleep(self.config.retry_interval).await;

            if self.is_shut_down() {
                return Err(PoolError::ShutDown);
            }
        }
    }

    /// Return an instance to its class's free list, resetting it first.
    ///
    /// Returns false (and drops the instance) when it is not currently checked
    /// out: never pooled, already released, or reclaimed by the reaper.
    pub fn release(&self, event: Event) -> bool {
        let event_id = event.id();
        let list = self.existing_list(event.class_name());
        let Some(list) = list else {
            debug!(class = event.class_name(), event_id = %event_id, "Released event has no pool");
            return false;
        };

        let class = event.class_name().to_string();
        let released = lock_list(&list).release(event);
        if released {
            self.dirty.store(true, Ordering::Release);
            debug!(class = class.as_str(), event_id = %event_id, "Released event");
        } else {
            debug!(class = class.as_str(), event_id = %event_id, "Event was not checked out; ignoring release");
        }
        released
    }

    /// Force-release every checkout older than `checkout_timeout`.
    /// Returns how many were reclaimed.
    pub fn cleanup_locked_events(&self) -> usize {
        let now = Instant::now();
        let mut reclaimed = 0;
        let mut outstanding = 0;

        for (class, list) in self.snapshot_lists() {
            let mut guard = lock_list(&list);
            for event_id in guard.reap(self.config.checkout_timeout, now) {
                warn!(
                    class = %class,
                    event_id = %event_id,
                    timeout_ms = self.config.checkout_timeout.as_millis() as u64,
                    "Forcing release of abandoned event; a listener never released it"
                );
                reclaimed += 1;
            }
            outstanding += guard.locked.len();
        }

        if outstanding > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        if reclaimed == 0 {
            debug!(outstanding, "All was clean; no events needed to be released");
        }
        reclaimed
    }

    /// One reaper pass: skipped when nothing happened since the last pass and
    /// nothing is checked out.
    pub fn sweep(&self) -> usize {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            debug!("Event pool idle; skipping sweep");
            return 0;
        }
        self.cleanup_locked_events()
    }

    pub fn stats(&self, class_name: &str) -> Option<PoolStats> {
        self.existing_list(class_name).map(|list| {
            let guard = lock_list(&list);
            PoolStats {
                free: guard.free.len(),
                locked: guard.locked.len(),
            }
        })
    }

    /// Start the background reaper. It stops when [`Reaper::shutdown`] is
    /// called, when the handle is dropped, or when the pool goes away.
    pub fn spawn_reaper(self: &Arc<Self>) -> Reaper {
        let (stop, mut stop_rx) = watch::channel(false);
        let pool = Arc::downgrade(self);
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Starting event pool reaper");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        if pool.is_shut_down() {
                            break;
                        }
                        pool.sweep();
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Event pool reaper stopped");
        });

        Reaper { stop, handle }
    }

    /// Drop every pooled instance and refuse further checkouts.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let classes = lists.len();
        lists.clear();
        info!(classes, "Event pool shut down");
    }

    fn list_for(&self, class: &Arc<EventClass>) -> Arc<Mutex<EventList>> {
        if let Some(list) = self.existing_list(class.name()) {
            return list;
        }
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            lists
                .entry(Arc::clone(class.id()))
                .or_insert_with(|| Arc::new(Mutex::new(EventList::default()))),
        )
    }

    fn existing_list(&self, class_name: &str) -> Option<Arc<Mutex<EventList>>> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class_name)
            .cloned()
    }

    fn snapshot_lists(&self) -> Vec<(ClassId, Arc<Mutex<EventList>>)> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(class, list)| (Arc::clone(class), Arc::clone(list)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

/// Handle to the background sweep task.
pub struct Reaper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Event pool reaper task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

//! TTL-bounded table of pending replies keyed by correlation id.
//!
//! Every entry leaves the map exactly once: through `take`/`delete` (reply or
//! rejection) or through the expiry sweep, which then calls the entry's
//! `on_expire`. Removal goes through `DashMap::remove`/`remove_if`, so a reply
//! racing the sweep is decided by whichever removes the entry first.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type ExpireFn<T> = Box<dyn FnOnce(String, T) + Send + Sync>;

struct Entry<T> {
    value: T,
    deadline: Instant,
    on_expire: ExpireFn<T>,
}

struct Inner<T> {
    entries: DashMap<String, Entry<T>>,
    ttl: Duration,
}

/// Cloneable handle; clones share one table.
pub struct CorrelationMap<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CorrelationMap<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> CorrelationMap<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.entries.contains_key(id)
    }

    /// Register a waiter. Returns `false` if `id` is already pending; the
    /// existing entry is left untouched and the new one is discarded.
    pub fn add<F>(&self, id: impl Into<String>, value: T, on_expire: F) -> bool
    where
        F: FnOnce(String, T) + Send + Sync + 'static,
    {
        let entry = Entry {
            value,
            deadline: Instant::now() + self.inner.ttl,
            on_expire: Box::new(on_expire),
        };
        match self.inner.entries.entry(id.into()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(entry);
                true
            }
        }
    }

    /// Clone of the pending value, entry stays registered.
    pub fn get(&self, id: &str) -> Option<T>
    where
        T: Clone,
    {
        self.inner.entries.get(id).map(|e| e.value.clone())
    }

    /// Remove and return the pending value. No-op if already gone.
    pub fn take(&self, id: &str) -> Option<T> {
        self.inner.entries.remove(id).map(|(_, e)| e.value)
    }

    /// Remove without returning. No-op if already gone.
    pub fn delete(&self, id: &str) -> bool {
        self.inner.entries.remove(id).is_some()
    }

    /// Push the deadline of a live entry to `now + ttl`.
    pub fn refresh(&self, id: &str) -> bool {
        match self.inner.entries.get_mut(id) {
            Some(mut e) => {
                e.deadline = Instant::now() + self.inner.ttl;
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose deadline is at or before `now` and call its
    /// `on_expire`. Returns how many expired.
    pub fn sweep(&self, now: Instant) -> usize {
        sweep_inner(&self.inner, now)
    }

    /// Remove everything without firing `on_expire`; returns the values.
    pub fn drain(&self) -> Vec<(String, T)> {
        let keys: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|k| self.inner.entries.remove(&k).map(|(k, e)| (k, e.value)))
            .collect()
    }

    /// Background sweep on a fixed interval. The task holds only a weak
    /// reference and ends once every handle to the map is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let expired = sweep_inner(&inner, Instant::now());
                if expired > 0 {
                    tracing::debug!(expired, "correlation entries expired");
                }
            }
        })
    }
}

fn sweep_inner<T>(inner: &Inner<T>, now: Instant) -> usize {
    let due: Vec<String> = inner
        .entries
        .iter()
        .filter(|e| e.deadline <= now)
        .map(|e| e.key().clone())
        .collect();

    let mut expired = 0;
    for id in due {
        // re-check: the entry may have been refreshed or resolved meanwhile
        if let Some((id, entry)) = inner.entries.remove_if(&id, |_, e| e.deadline <= now) {
            (entry.on_expire)(id, entry.value);
            expired += 1;
        }
    }
    expired
}

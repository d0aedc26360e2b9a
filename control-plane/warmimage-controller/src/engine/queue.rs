use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::lock;
use super::rate_limit::{RateLimiter, default_controller_rate_limiter};

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys that need processing: queued, or re-added while in flight.
    dirty: HashSet<String>,
    /// Keys handed out by `get` and not yet `done`.
    processing: HashSet<String>,
    /// Keys scheduled by `add_after`, with the instant each becomes ready.
    /// One entry per key: a later delayed add can only pull it earlier.
    waiting: HashMap<String, Instant>,
    /// Whether a task is draining `waiting`.
    timer_running: bool,
    shutting_down: bool,
}

/// Deduplicating, rate-limited queue of work keys.
///
/// A key is never handed to two workers at once. Adding a key that is in
/// flight only marks it dirty; `done` then puts it back on the queue, so an
/// update that lands mid-reconcile is processed afterwards instead of lost.
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    /// Wakes the delay timer when an earlier deadline arrives or on shutdown.
    timer: Notify,
    limiter: Box<dyn RateLimiter>,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_rate_limiter(name, default_controller_rate_limiter())
    }

    pub fn with_rate_limiter(
        name: impl Into<String>,
        limiter: impl RateLimiter + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            timer: Notify::new(),
            limiter: Box::new(limiter),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut st = lock(&self.state);
        if st.shutting_down {
            trace!(queue = %self.name, %key, "queue shutting down; add ignored");
            return;
        }
        if !st.dirty.insert(key.clone()) {
            return;
        }
        if st.processing.contains(&key) {
            trace!(queue = %self.name, %key, "key in flight; marked dirty");
            return;
        }
        st.queue.push_back(key);
        drop(st);
        self.notify.notify_one();
    }

    /// Add the key once `delay` has elapsed.
    ///
    /// Delayed adds of the same key merge: the key waits once, until the
    /// earliest requested instant. A key that is already queued or dirty is
    /// not scheduled again.
    pub fn add_after(self: &Arc<Self>, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready_at = Instant::now() + delay;
        let mut st = lock(&self.state);
        if st.shutting_down {
            return;
        }
        if st.dirty.contains(&key) {
            trace!(queue = %self.name, %key, "key already pending; delayed add merged");
            return;
        }
        let earlier = match st.waiting.entry(key) {
            Entry::Occupied(mut e) if ready_at < *e.get() => {
                e.insert(ready_at);
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(ready_at);
                true
            }
        };
        let start_timer = !st.timer_running;
        st.timer_running = true;
        drop(st);
        if start_timer {
            tokio::spawn(drain_waiting(Arc::clone(self)));
        } else if earlier {
            self.timer.notify_one();
        }
    }

    /// Add the key after whatever backoff the rate limiter assigns to it.
    pub fn add_rate_limited(self: &Arc<Self>, key: impl Into<String>) {
        let key = key.into();
        let delay = self.limiter.when(&key);
        trace!(queue = %self.name, %key, ?delay, "rate limited add");
        self.add_after(key, delay);
    }

    /// Reset the key's backoff.
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or
            // shutdown cannot slip between the check and the wait.
            notified.as_mut().enable();
            {
                let mut st = lock(&self.state);
                if st.shutting_down {
                    return None;
                }
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark the key as no longer in flight, re-queueing it if it was added
    /// again while being processed.
    pub fn done(&self, key: &str) {
        let mut st = lock(&self.state);
        st.processing.remove(key);
        if st.dirty.contains(key) {
            debug!(queue = %self.name, %key, "key changed while in flight; re-queueing");
            st.queue.push_back(key.to_string());
            drop(st);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and release every waiting `get`. Keys already
    /// handed out may still be completed with `done`.
    pub fn shut_down(&self) {
        {
            let mut st = lock(&self.state);
            st.shutting_down = true;
            st.waiting.clear();
        }
        self.notify.notify_waiters();
        self.timer.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.state).shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Moves waiting keys onto the queue as they come due. Exits once nothing
/// is waiting or the queue shuts down; `add_after` starts a new one as needed.
async fn drain_waiting(queue: Arc<WorkQueue>) {
    loop {
        let (due, next) = {
            let mut st = lock(&queue.state);
            if st.shutting_down {
                st.timer_running = false;
                return;
            }
            let now = Instant::now();
            let due: Vec<String> = st
                .waiting
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &due {
                st.waiting.remove(key);
            }
            let next = st.waiting.values().min().copied();
            if next.is_none() {
                st.timer_running = false;
            }
            (due, next)
        };
        for key in due {
            queue.add(key);
        }
        let Some(next) = next else {
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep_until(next) => {}
            _ = queue.timer.notified() => {}
        }
    }
}

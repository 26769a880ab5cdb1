//! A deduplicating, rate-limited work queue.
//!
//! Keys move through three sets:
//!
//! - `dirty` holds every key that needs processing, including keys that are
//!   currently being processed and were added again in the meantime;
//! - `queue` orders the dirty keys that are ready to be handed to a worker;
//! - `processing` holds keys that a worker has taken with [`WorkQueue::get`]
//!   and not yet released with [`WorkQueue::done`].
//!
//! A key is never in `queue` and `processing` at the same time, so no two
//! workers process the same key concurrently. A key that is added while it is
//! being processed is queued again when the worker calls `done`.

use crate::Backoff;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::{
    sync::Notify,
    time::{self, Duration},
};

pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: Backoff,
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutdown: bool,
}

// === impl WorkQueue ===

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutdown: false,
                }),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    /// Marks a key as needing processing.
    ///
    /// Adding a key that is already waiting is a no-op. Adding a key that is
    /// being processed defers it until the current pass calls `done`.
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutdown || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Adds a key once `delay` has elapsed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        if self.is_shutdown() {
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Adds a key after its backoff delay, counting another failure against it.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(key.clone()).or_default();
            let delay = self.inner.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
    }

    /// Clears the failure history of a key so that its next rate-limited add
    /// starts from the base delay.
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Waits for the next key to process.
    ///
    /// Returns `None` once the queue has been shut down and drained. The
    /// returned key must be released with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            // Register for wakeups before inspecting the state so that an add
            // between the check and the await is not missed.
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Releases a key taken with `get`, queueing it again if it was added
    /// while it was being processed.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_waiters();
        }
    }

    /// Stops accepting new keys. Waiting workers drain the keys that are
    /// already queued and then observe the shutdown.
    pub fn shutdown(&self) {
        self.inner.state.lock().shutdown = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Returns the number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> WorkQueue<&'static str> {
        WorkQueue::new(Backoff::default())
    }

    #[tokio::test]
    async fn deduplicates_waiting_keys() {
        let queue = queue();
        queue.add("a");
        queue.add("b");
        queue.add("a");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn defers_keys_added_while_processing() {
        let queue = queue();
        queue.add("a");
        assert_eq!(queue.get().await, Some("a"));

        // The key is re-added while a worker holds it. It must not be handed
        // to another worker until the first one is done.
        queue.add("a");
        queue.add("a");
        assert!(queue.is_empty());

        queue.done(&"a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_add() {
        let queue = queue();
        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });
        tokio::task::yield_now().await;
        assert!(!worker.is_finished());

        queue.add("a");
        assert_eq!(worker.await.unwrap(), Some("a"));
    }

    #[tokio::test]
    async fn shutdown_drains_then_stops() {
        let queue = queue();
        queue.add("a");
        queue.shutdown();
        queue.add("b");

        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a");
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn shutdown_wakes_waiting_workers() {
        let queue = queue();
        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });
        tokio::task::yield_now().await;

        queue.shutdown();
        assert_eq!(worker.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_back_off() {
        let queue = WorkQueue::new(Backoff::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
        ));

        for expected in [5, 10, 20, 20] {
            let start = time::Instant::now();
            queue.add_rate_limited("a");
            assert!(queue.is_empty(), "key must not be queued before its delay");

            assert_eq!(queue.get().await, Some("a"));
            assert!(start.elapsed() >= Duration::from_millis(expected));
            queue.done(&"a");
        }
        assert_eq!(queue.num_requeues(&"a"), 4);

        queue.forget(&"a");
        assert_eq!(queue.num_requeues(&"a"), 0);

        let start = time::Instant::now();
        queue.add_rate_limited("a");
        assert_eq!(queue.get().await, Some("a"));
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_never_share_a_key() {
        let queue = queue();
        let active = Arc::new(AtomicUsize::new(0));

        let workers = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let active = active.clone();
                tokio::spawn(async move {
                    while let Some(key) = queue.get().await {
                        assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0, "{key} is shared");
                        tokio::task::yield_now().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        queue.done(&key);
                    }
                })
            })
            .collect::<Vec<_>>();

        for _ in 0..100 {
            queue.add("a");
            tokio::task::yield_now().await;
        }
        queue.shutdown();

        for worker in workers {
            worker.await.unwrap();
        }
    }
}

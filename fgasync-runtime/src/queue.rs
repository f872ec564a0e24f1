//! Deduplicating work queue with per-key serialization.

use fgasync_core::meta::ObjectKey;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Keys waiting to be reconciled.
///
/// - A key is queued at most once, however often it is added.
/// - A key handed out by [`next`](Self::next) is not handed out again until
///   [`done`](Self::done); adding it meanwhile re-queues it after `done`.
/// - [`add_after`](Self::add_after) delays a key on the tokio clock, so
///   paused-time tests observe backoff without sleeping.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    /// Added while processing.
    dirty: HashSet<ObjectKey>,
    /// Ordered by due time, then insertion.
    delayed: BTreeMap<(Instant, u64), ObjectKey>,
    sequence: u64,
    failures: HashMap<ObjectKey, u32>,
}

impl QueueState {
    fn push(&mut self, key: ObjectKey) -> bool {
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if !self.queued.insert(key.clone()) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    fn pop(&mut self) -> Option<ObjectKey> {
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.push(key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.keys().next().map(|(at, _)| *at)
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: ObjectKey) {
        if lock(&self.state).push(key) {
            self.notify.notify_one();
        }
    }

    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        {
            let mut state = lock(&self.state);
            state.sequence += 1;
            let slot = (Instant::now() + delay, state.sequence);
            state.delayed.insert(slot, key);
        }
        // Wake the consumer so it re-arms its timer.
        self.notify.notify_one();
    }

    /// Wait for the next ready key and mark it as processing.
    ///
    /// Cancel safe: a key is only taken when the returned future completes.
    pub async fn next(&self) -> ObjectKey {
        loop {
            let deadline = {
                let mut state = lock(&self.state);
                state.promote_due(Instant::now());
                if let Some(key) = state.pop() {
                    return key;
                }
                state.next_deadline()
            };
            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Release a key handed out by [`next`](Self::next).
    pub fn done(&self, key: &ObjectKey) {
        let requeued = {
            let mut state = lock(&self.state);
            state.processing.remove(key);
            state.dirty.remove(key) && state.push(key.clone())
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Count a failed reconcile and return how many failures preceded it.
    pub fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut state = lock(&self.state);
        let failures = state.failures.entry(key.clone()).or_insert(0);
        let attempt = *failures;
        *failures = failures.saturating_add(1);
        attempt
    }

    /// Reset the failure count of a key.
    pub fn forget(&self, key: &ObjectKey) {
        lock(&self.state).failures.remove(key);
    }

    /// Ready plus delayed keys.
    pub fn len(&self) -> usize {
        let state = lock(&self.state);
        state.ready.len() + state.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("root:orgs", name)
    }

    #[tokio::test]
    async fn test_adds_are_deduplicated() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        queue.add(key("b"));
        queue.add(key("a"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().await, key("a"));
        assert_eq!(queue.next().await, key("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_added_while_processing_is_requeued_after_done() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        let taken = queue.next().await;

        queue.add(key("a"));
        assert!(queue.is_empty());

        queue.done(&taken);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, key("a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        let taken = queue.next().await;
        queue.done(&taken);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_key_waits_for_its_deadline() {
        let queue = WorkQueue::new();
        let start = Instant::now();
        queue.add_after(key("late"), Duration::from_secs(5));
        queue.add_after(key("early"), Duration::from_secs(1));

        assert_eq!(queue.next().await, key("early"));
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(queue.next().await, key("late"));
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_wakes_a_waiting_consumer() {
        let queue = std::sync::Arc::new(WorkQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.add(key("a"));
        assert_eq!(consumer.await.unwrap(), key("a"));
    }

    #[test]
    fn test_failures_are_counted_until_forgotten() {
        let queue = WorkQueue::new();
        assert_eq!(queue.record_failure(&key("a")), 0);
        assert_eq!(queue.record_failure(&key("a")), 1);
        assert_eq!(queue.record_failure(&key("b")), 0);
        queue.forget(&key("a"));
        assert_eq!(queue.record_failure(&key("a")), 0);
    }
}

//! A keyed retransmission timer service shared by every protocol.
//!
//! Every protocol in this crate needs "fire an event after a delay,
//! unless it gets cancelled or rescheduled first" — rdt3.0's single ACK
//! timer, Go-Back-N's single window timer, Selective Repeat's per-packet
//! timers, and the simplified TCP's single retransmission timer all
//! reduce to the same primitive. This module implements it once on top
//! of [`tokio_util::time::DelayQueue`], which already solves the
//! cancel/reinsert race: an entry's [`Key`] becomes invalid the moment
//! it is removed or reset, so a timer that fires just as it is being
//! cancelled is simply absent from the queue rather than delivering a
//! stale expiry.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio_util::time::delay_queue::Key as QueueKey;
use tokio_util::time::DelayQueue;

/// A timer service keyed by an arbitrary identifier `K`.
///
/// `K` is typically a sequence number (stop-and-wait, GBN, SR) or a unit
/// type `()` (GBN and the simplified TCP each run a single timer per
/// connection). Not `Send`-shared on its own; protocols own one per
/// connection task and drive it from their event loop's `select!`.
pub struct Timers<K> {
    queue: DelayQueue<K>,
    keys: HashMap<K, QueueKey>,
}

impl<K> Default for Timers<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Timers<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    /// Starts a timer for `key` after `delay`, replacing any timer
    /// already running for that key.
    pub fn start(&mut self, key: K, delay: Duration) {
        self.cancel(&key);
        let queue_key = self.queue.insert(key.clone(), delay);
        self.keys.insert(key, queue_key);
    }

    /// Cancels the timer for `key`, if one is running. A no-op otherwise.
    pub fn cancel(&mut self, key: &K) {
        if let Some(queue_key) = self.keys.remove(key) {
            self.queue.try_remove(&queue_key);
        }
    }

    /// Reschedules the timer for `key` to fire `delay` from now,
    /// starting it if it was not already running. Used to apply a
    /// freshly estimated RTO without losing the timer's identity.
    pub fn reset(&mut self, key: K, delay: Duration) {
        self.start(key, delay);
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.keys.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Waits for the next timer to expire, returning its key. When no
    /// timer is running this deliberately never resolves, rather than
    /// following `DelayQueue`'s own `Poll::Ready(None)`-on-empty
    /// behavior — resolving immediately would busy-loop any
    /// `tokio::select!` built around this as a branch with no timers
    /// active.
    pub async fn next_expired(&mut self) -> Option<K> {
        use futures::StreamExt;
        if self.queue.is_empty() {
            return std::future::pending().await;
        }
        let expired = self.queue.next().await?;
        let key = expired.into_inner();
        self.keys.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_after_delay() {
        let mut timers = Timers::new();
        timers.start(1u32, Duration::from_millis(10));
        assert_eq!(timers.next_expired().await, Some(1));
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let mut timers: Timers<u32> = Timers::new();
        timers.start(1, Duration::from_millis(10));
        timers.cancel(&1);
        assert!(timers.is_empty());
    }

    #[tokio::test]
    async fn restart_replaces_the_deadline() {
        let mut timers = Timers::new();
        timers.start(1u32, Duration::from_millis(5));
        timers.start(1, Duration::from_secs(10));
        assert!(timers.is_running(&1));
        // Only one timer for key 1 should be queued, not two.
        assert_eq!(timers.queue.len(), 1);
    }

    #[tokio::test]
    async fn tracks_multiple_keys_independently() {
        let mut timers = Timers::new();
        timers.start(1u32, Duration::from_millis(5));
        timers.start(2u32, Duration::from_millis(50));
        assert_eq!(timers.next_expired().await, Some(1));
        assert!(timers.is_running(&2));
    }
}

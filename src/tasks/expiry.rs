//! Expiry Scheduler
//!
//! Keeps one one-shot timer task per live key. A timer sleeps for the key's
//! remaining TTL and then hands the key back to its owner through the
//! `on_fire` callback given when it was armed.
//!
//! Every armed timer gets a token. The owner confirms a firing with
//! [`ExpiryScheduler::complete`], which only succeeds while that token is still
//! the current one for the key, so a timer that lost a race against a rearm
//! or a cancel does nothing.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cache::{Key, MAX_TIMER_DELAY_MS};

#[derive(Debug)]
struct Timer {
    token: u64,
    handle: JoinHandle<()>,
}

/// Timer table: key -> pending expiry.
///
/// All timers are aborted when the scheduler is dropped.
#[derive(Debug, Default)]
pub struct ExpiryScheduler {
    timers: HashMap<Key, Timer>,
    next_token: u64,
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the expiry timer for `key`, replacing any timer it already has.
    ///
    /// Delays beyond [`MAX_TIMER_DELAY_MS`] arm nothing and return `false`;
    /// such keys only expire through the restore-time check.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, key: Key, delay: Duration, on_fire: F) -> bool
    where
        F: FnOnce(Key, u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(&key);

        if delay.as_millis() > u128::from(MAX_TIMER_DELAY_MS) {
            debug!(
                segment = %key.segment,
                id = %key.id,
                delay_ms = delay.as_millis(),
                "TTL beyond timer range, no expiry timer armed"
            );
            return false;
        }

        self.next_token += 1;
        let token = self.next_token;
        let fire_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(fire_key, token).await;
        });

        trace!(segment = %key.segment, id = %key.id, token, "Expiry timer armed");
        self.timers.insert(key, Timer { token, handle });
        true
    }

    /// Cancels the timer for `key`. Returns whether one was armed.
    pub fn cancel(&mut self, key: &Key) -> bool {
        match self.timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Retires the timer for `key` after it fired.
    ///
    /// Returns `false` when `token` is stale, meaning the key was rearmed or
    /// cancelled after this timer was armed.
    pub fn complete(&mut self, key: &Key, token: u64) -> bool {
        match self.timers.get(key) {
            Some(timer) if timer.token == token => {
                self.timers.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Cancels every timer. Returns how many were armed.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        count
    }

    pub fn is_armed(&self, key: &Key) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

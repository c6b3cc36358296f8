//! Bounded, jittered exponential backoff for the TCP/TLS connect loop.
//!
//! The CONNECT handshake itself is never retried here; only the transport
//! connection is.

use std::thread;
use std::time::Duration;

use rand::Rng;

/// Transport connection attempts per `connect` call.
const MAX_CONNECT_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryStatus {
    /// Slept; the caller may attempt again.
    Again,
    /// All attempts used up.
    Exhausted,
}

/// Reconnect attempt and backoff bookkeeping, reset per `connect` call.
#[derive(Debug)]
pub(crate) struct RetryParams {
    attempts: u32,
    backoff_ms: u64,
}

impl RetryParams {
    pub fn new() -> Self {
        RetryParams {
            attempts: 0,
            backoff_ms: INITIAL_BACKOFF_MS,
        }
    }

    /// The next backoff delay, or `None` once attempts are exhausted.
    /// Advances the doubling schedule.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= MAX_CONNECT_ATTEMPTS {
            return None;
        }
        self.attempts += 1;

        let jitter = rand::thread_rng().gen_range(0..=self.backoff_ms / 2);
        let delay = Duration::from_millis(self.backoff_ms + jitter);
        self.backoff_ms = (self.backoff_ms * 2).min(MAX_BACKOFF_MS);
        Some(delay)
    }

    /// Sleep for the current backoff delay with jitter.
    pub fn backoff_and_sleep(&mut self) -> RetryStatus {
        match self.next_delay() {
            Some(delay) => {
                debug!("retrying the broker connection in {:?}", delay);
                thread::sleep(delay);
                RetryStatus::Again
            }
            None => RetryStatus::Exhausted,
        }
    }
}

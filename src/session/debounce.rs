// session/debounce.rs - Cancel-and-reschedule Debounce
//
// Holds the latest value and a deadline. Every schedule() replaces both, so
// only the last value of a burst is delivered, one delay after the burst
// ends. settled() is cancel-safe: dropping it mid-wait loses nothing.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn schedule(&mut self, value: T) {
        self.pending = Some((Instant::now() + self.delay, value));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolves with the last scheduled value once its deadline passes.
    /// Never resolves while nothing is pending.
    pub async fn settled(&mut self) -> T {
        let deadline = match &self.pending {
            Some((deadline, _)) => *deadline,
            None => return std::future::pending().await,
        };
        sleep_until(deadline).await;
        match self.pending.take() {
            Some((_, value)) => value,
            None => std::future::pending().await,
        }
    }
}

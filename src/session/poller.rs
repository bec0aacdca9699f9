// session/poller.rs - Cancellable Periodic Poll
//
// Wraps a tokio Interval that can be absent. A disabled or cancelled poller
// simply never ticks, so it can sit in a select! unconditionally.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug)]
pub struct Poller {
    interval: Option<Interval>,
}

impl Poller {
    /// First tick one period from now
    pub fn every(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval: Some(interval) }
    }

    pub fn disabled() -> Self {
        Self { interval: None }
    }

    pub fn cancel(&mut self) {
        self.interval = None;
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let mut poller = Poller::every(Duration::from_secs(1));
        let start = Instant::now();
        poller.tick().await;
        poller.tick().await;
        assert_eq!(Instant::now() - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_poller_never_ticks() {
        let mut poller = Poller::every(Duration::from_secs(1));
        poller.cancel();
        assert!(!poller.is_active());
        let ticked = tokio::time::timeout(Duration::from_secs(5), poller.tick()).await;
        assert!(ticked.is_err());
    }
}

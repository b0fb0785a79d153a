use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval_ms: u64) -> Result<Self> {
        anyhow::ensure!(interval_ms > 0, "tick interval must be greater than zero");
        Ok(Self {
            interval: Duration::from_millis(interval_ms),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// job: async closure run on every tick, first one interval from now.
    ///
    /// A job that overruns its tick delays the next one instead of stacking
    /// runs up. Never returns.
    pub async fn run<J, F>(&self, mut job: J)
    where
        J: FnMut() -> F,
        F: Future<Output = ()>,
    {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            job().await;
        }
    }
}

//! One-second cadence that only exists while a timer is running.

use std::time::Duration;

use tokio::time::{self, Interval, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

/// Armed while the room timer runs; dropping the interval is the cancellation.
#[derive(Default)]
pub struct Ticker {
    interval: Option<Interval>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm or disarm. Re-arming an armed ticker keeps its cadence.
    pub fn arm(&mut self, running: bool) {
        match (running, self.interval.is_some()) {
            (true, false) => {
                let mut interval = time::interval(TICK);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.interval = Some(interval);
            }
            (false, true) => self.interval = None,
            _ => {}
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolve on the next tick; pend forever while disarmed.
    /// Designed to be used inside `tokio::select!`.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

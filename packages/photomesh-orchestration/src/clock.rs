//! Injectable time source
//!
//! The synthetic executor only reads time and sleeps through [`Clock`], so a
//! [`ManualClock`] turns a half-hour simulated run into an instant test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real time via `chrono` and `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    slept: Duration,
    sleeps: usize,
}

/// Clock whose `sleep` advances time instantly
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                slept: Duration::ZERO,
                sleeps: 0,
            }),
        }
    }

    /// Move time forward without counting it as a sleep
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }

    pub fn total_slept(&self) -> Duration {
        self.state.lock().slept
    }

    pub fn sleep_calls(&self) -> usize {
        self.state.lock().sleeps
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state.lock();
            state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
            state.slept += duration;
            state.sleeps += 1;
        }
        // let other tasks (e.g. a canceller) observe progress
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_now() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(90)).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(clock.total_slept(), Duration::from_millis(90_500));
        assert_eq!(clock.sleep_calls(), 2);
        assert_eq!(
            clock.now() - start,
            chrono::Duration::milliseconds(90_500)
        );
    }

    #[test]
    fn test_advance_is_not_a_sleep() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(clock.sleep_calls(), 0);
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= before);
    }
}

//! Time source and repeating timers for the feed scheduler.
//!
//! [`SystemClock`] is backed by the wall clock and tokio timers.
//! [`MockClock`] only moves when told to, which lets tests step the
//! scheduler one cycle at a time without sleeping.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Creates a timer that fires every `period`, first one `period` from now.
    fn ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick.
    async fn tick(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        // A slow cycle pushes the schedule back instead of bunching ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(SystemTicker(interval))
    }
}

struct SystemTicker(Interval);

#[async_trait]
impl Ticker for SystemTicker {
    async fn tick(&mut self) {
        self.0.tick().await;
    }
}

/// A manually driven clock.
///
/// Time starts at the given instant (the Unix epoch by default) and only
/// moves through [`MockClock::advance`] or [`MockClock::set`].
#[derive(Clone)]
pub struct MockClock {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    now: DateTime<Utc>,
    timers: Vec<MockTimer>,
}

struct MockTimer {
    next: DateTime<Utc>,
    period: TimeDelta,
    tx: mpsc::UnboundedSender<()>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                now: start,
                timers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves time forward by `by`, firing every timer that falls due on the
    /// way in chronological order. All ticks are delivered before this returns.
    pub fn advance(&self, by: Duration) {
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let target = {
            let state = self.lock();
            state.now.checked_add_signed(by).unwrap_or(state.now)
        };
        self.set(target);
    }

    /// Moves time to `target`. Moving backwards fires nothing.
    pub fn set(&self, target: DateTime<Utc>) {
        let mut state = self.lock();
        state.timers.retain(|t| !t.tx.is_closed());
        loop {
            let due = state
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.next <= target)
                .min_by_key(|(_, t)| t.next)
                .map(|(i, _)| i);
            let Some(i) = due else {
                break;
            };
            let fired_at = state.timers[i].next;
            let _ = state.timers[i].tx.send(());
            match fired_at.checked_add_signed(state.timers[i].period) {
                Some(next) => state.timers[i].next = next,
                None => {
                    state.timers.swap_remove(i);
                }
            }
            state.now = state.now.max(fired_at);
        }
        state.now = target;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let (tx, rx) = mpsc::unbounded_channel();
        let period = TimeDelta::from_std(period)
            .ok()
            .filter(|p| *p > TimeDelta::zero())
            .unwrap_or(TimeDelta::MAX);
        let mut state = self.lock();
        let next = state
            .now
            .checked_add_signed(period)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.timers.push(MockTimer { next, period, tx });
        Box::new(MockTicker(rx))
    }
}

struct MockTicker(mpsc::UnboundedReceiver<()>);

#[async_trait]
impl Ticker for MockTicker {
    async fn tick(&mut self) {
        if self.0.recv().await.is_none() {
            // Clock dropped; no tick will ever come.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_clock_fires_due_ticks() {
        let clock = MockClock::default();
        let mut ticker = clock.ticker(Duration::from_secs(5));

        clock.advance(Duration::from_secs(4));
        assert_eq!(clock.now().timestamp(), 4);

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now().timestamp(), 5);
        tokio::time::timeout(Duration::from_secs(1), ticker.tick())
            .await
            .expect("tick should be delivered");
    }

    #[tokio::test]
    async fn test_mock_clock_fires_once_per_elapsed_period() {
        let clock = MockClock::default();
        let mut ticker = clock.ticker(Duration::from_secs(5));

        clock.advance(Duration::from_secs(15));
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), ticker.tick())
                .await
                .expect("tick should be delivered");
        }
        let extra = tokio::time::timeout(Duration::from_millis(50), ticker.tick()).await;
        assert!(extra.is_err());
    }

    #[test]
    fn test_mock_clock_set_backwards_fires_nothing() {
        let clock = MockClock::default();
        clock.advance(Duration::from_secs(10));
        let _ticker = clock.ticker(Duration::from_secs(5));
        clock.set(DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(clock.now(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_ticker_waits_one_period() {
        let clock = SystemClock;
        let mut ticker = clock.ticker(Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}

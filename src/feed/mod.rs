//! Feed generation engine.
//!
//! A [`Feed`] owns one scheduling loop. Each cycle asks its [`CycleRunner`]
//! for entities, wraps them in a full-dataset [`FeedMessage`], publishes the
//! encoded bytes to a [`SnapshotStore`] and reports to a [`CycleObserver`].
//! The first cycle runs inside [`Feed::start`], so the feed never serves a
//! placeholder once constructed.

pub mod alerts;
pub mod cache;
pub mod message;
pub mod snapshot;
pub mod trip_updates;

pub use alerts::{AlertRunner, build_alert_entities};
pub use cache::SourceCache;
pub use message::build_feed_message;
pub use snapshot::{FeedSnapshot, SnapshotStore};
pub use trip_updates::{TripUpdateRunner, build_trip_update_entities};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use prost::Message;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info};

use crate::clock::{Clock, Ticker};
use crate::error::SourceError;
use crate::gtfs_rt::{FeedEntity, FeedMessage};
use crate::source::{IncidentSource, TrainSource};
use crate::static_data::StaticData;

/// Result of querying and transforming every source once.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub entities: Vec<FeedEntity>,
    pub errors: Vec<SourceError>,
}

/// Produces the entities of one feed type.
///
/// Implementations own their per-source cache; a cycle never fails, it
/// reports source failures through [`CycleOutcome::errors`].
#[async_trait]
pub trait CycleRunner: Send + 'static {
    async fn run_cycle(&mut self) -> CycleOutcome;
}

/// Notified after every published cycle, including the startup cycle.
///
/// Runs on the scheduling loop, so it must return promptly.
pub trait CycleObserver: Send + Sync + 'static {
    fn on_cycle_complete(&self, message: &FeedMessage, errors: &[SourceError]);
}

impl<F> CycleObserver for F
where
    F: Fn(&FeedMessage, &[SourceError]) + Send + Sync + 'static,
{
    fn on_cycle_complete(&self, message: &FeedMessage, errors: &[SourceError]) {
        self(message, errors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Running,
    Stopped,
}

/// A running feed: its snapshot store plus the loop that refreshes it.
pub struct Feed {
    name: &'static str,
    store: SnapshotStore,
    cancel: CancellationToken,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Feed {
    /// Runs the first cycle, publishes it, then keeps refreshing every
    /// `period` until [`Feed::shutdown`] is called or the feed is dropped.
    pub async fn start<R, O>(
        name: &'static str,
        clock: Arc<dyn Clock>,
        period: Duration,
        runner: R,
        observer: O,
    ) -> Result<Self>
    where
        R: CycleRunner,
        O: CycleObserver,
    {
        if period.is_zero() {
            bail!("{name}: update period must be greater than zero");
        }

        let store = SnapshotStore::new();
        let mut scheduler = Scheduler {
            name,
            clock: clock.clone(),
            runner,
            observer,
            store: store.clone(),
            last_generated_at: None,
        };

        let outcome = scheduler.runner.run_cycle().await;
        scheduler.publish(outcome);

        // Created before returning so no tick issued after start is missed.
        let ticker = clock.ticker(period);
        let cancel = CancellationToken::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let span = tracing::info_span!("feed", feed = name);
        let task = tokio::spawn(
            scheduler
                .run(ticker, cancel.clone(), stopped.clone())
                .instrument(span),
        );
        info!(feed = name, period_secs = period.as_secs_f64(), "Feed started");

        Ok(Self {
            name,
            store,
            cancel,
            stopped,
            task,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bytes of the most recently published message.
    pub fn get(&self) -> Bytes {
        self.store.get()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.store.latest()
    }

    /// A read handle that outlives borrowing the feed, for request handlers.
    pub fn store(&self) -> SnapshotStore {
        self.store.clone()
    }

    /// `Stopped` once the loop has exited, including when it panicked.
    pub fn state(&self) -> FeedState {
        if self.stopped.load(Ordering::Acquire) || self.task.is_finished() {
            FeedState::Stopped
        } else {
            FeedState::Running
        }
    }

    /// A token that stops this feed when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the loop and waits for it to exit. A cycle in progress is
    /// abandoned without publishing.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            error!(feed = self.name, error = %e, "Scheduling loop failed");
        }
        info!(feed = self.name, "Feed stopped");
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Scheduler<R, O> {
    name: &'static str,
    clock: Arc<dyn Clock>,
    runner: R,
    observer: O,
    store: SnapshotStore,
    last_generated_at: Option<DateTime<Utc>>,
}

impl<R: CycleRunner, O: CycleObserver> Scheduler<R, O> {
    async fn run(
        mut self,
        mut ticker: Box<dyn Ticker>,
        cancel: CancellationToken,
        stopped: Arc<AtomicBool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.runner.run_cycle() => outcome,
            };
            self.publish(outcome);
        }
        stopped.store(true, Ordering::Release);
        debug!(feed = self.name, "Scheduling loop exited");
    }

    fn publish(&mut self, outcome: CycleOutcome) {
        // Never stamp a snapshot earlier than the one it replaces.
        let now = self.clock.now();
        let generated_at = match self.last_generated_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_generated_at = Some(generated_at);

        let message = build_feed_message(outcome.entities, generated_at);
        self.store
            .publish(FeedSnapshot::new(message.encode_to_vec(), generated_at));
        self.observer.on_cycle_complete(&message, &outcome.errors);
    }
}

/// Starts the trip-update feed over every station in `static_data`.
pub async fn new_trip_update_feed<O: CycleObserver>(
    clock: Arc<dyn Clock>,
    period: Duration,
    timeout: Duration,
    source: Arc<dyn TrainSource>,
    static_data: Arc<StaticData>,
    observer: O,
) -> Result<Feed> {
    if timeout.is_zero() {
        bail!("trip_updates: fetch timeout must be greater than zero");
    }
    let runner = TripUpdateRunner::new(source, static_data, clock.clone(), timeout);
    Feed::start("trip_updates", clock, period, runner, observer).await
}

/// Starts the alert feed over the Port Authority incident source.
pub async fn new_alert_feed<O: CycleObserver>(
    clock: Arc<dyn Clock>,
    period: Duration,
    timeout: Duration,
    source: Arc<dyn IncidentSource>,
    static_data: Arc<StaticData>,
    observer: O,
) -> Result<Feed> {
    if timeout.is_zero() {
        bail!("alerts: fetch timeout must be greater than zero");
    }
    let runner = AlertRunner::new(source, static_data, clock.clone(), timeout);
    Feed::start("alerts", clock, period, runner, observer).await
}

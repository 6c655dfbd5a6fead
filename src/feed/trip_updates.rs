//! Trip-update feed: per-station train predictions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::cache::SourceCache;
use super::{CycleOutcome, CycleRunner};
use crate::clock::Clock;
use crate::error::FetchError;
use crate::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate};
use crate::gtfs_rt::{FeedEntity, TripDescriptor, TripUpdate};
use crate::source::{Station, Train, TrainSource};
use crate::static_data::StaticData;

/// Builds one trip-update entity per complete, mapped train.
///
/// Stations are taken in the order given and trains in upstream order.
/// Trains missing a route, direction, arrival or update time, or whose
/// station or route has no published id, are skipped.
pub fn build_trip_update_entities(
    static_data: &StaticData,
    trains_by_station: &[(Station, Vec<Train>)],
) -> Vec<FeedEntity> {
    trains_by_station
        .iter()
        .flat_map(|(station, trains)| {
            trains
                .iter()
                .filter_map(move |train| trip_update_entity(static_data, *station, train))
        })
        .enumerate()
        .map(|(n, mut entity)| {
            entity.id = format!("{}-{}", entity.id, n);
            entity
        })
        .collect()
}

fn trip_update_entity(static_data: &StaticData, station: Station, train: &Train) -> Option<FeedEntity> {
    let route = train.route?;
    let direction = train.direction?;
    let arrival = train.projected_arrival?.timestamp();
    let last_updated = u64::try_from(train.last_updated?.timestamp()).ok()?;
    let stop_id = static_data.stop_id(station)?;
    let route_id = static_data.route_id(route)?;
    let direction_id = direction.direction_id();

    Some(FeedEntity {
        id: format!("{stop_id}-{route_id}-{direction_id}"),
        trip_update: Some(TripUpdate {
            trip: TripDescriptor {
                route_id: Some(route_id.to_string()),
                direction_id: Some(direction_id),
                ..Default::default()
            },
            timestamp: Some(last_updated),
            stop_time_update: vec![StopTimeUpdate {
                stop_id: Some(stop_id.to_string()),
                arrival: Some(StopTimeEvent {
                    time: Some(arrival),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Cycle runner for the trip-update feed.
///
/// Every mapped station is queried concurrently; each station is its own
/// source key for the stale-data fallback.
pub struct TripUpdateRunner {
    source: Arc<dyn TrainSource>,
    static_data: Arc<StaticData>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    cache: SourceCache<Station, Train>,
}

impl TripUpdateRunner {
    pub fn new(
        source: Arc<dyn TrainSource>,
        static_data: Arc<StaticData>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            static_data,
            clock,
            timeout,
            cache: SourceCache::new(),
        }
    }
}

#[async_trait]
impl CycleRunner for TripUpdateRunner {
    async fn run_cycle(&mut self) -> CycleOutcome {
        let stations: Vec<Station> = self.static_data.stations().collect();

        // Dropping the set (an abandoned cycle) aborts any fetch still running.
        let mut tasks = JoinSet::new();
        for station in stations.iter().copied() {
            let source = self.source.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result =
                    match tokio::time::timeout(timeout, source.trains_at_station(station)).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout(timeout)),
                    };
                (station, result)
            });
        }

        let mut results = HashMap::with_capacity(stations.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((station, result)) => {
                    results.insert(station, result);
                }
                Err(e) => warn!(error = %e, "Station fetch task failed"),
            }
        }
        let fetched: Vec<_> = stations
            .into_iter()
            .map(|station| {
                let result = results.remove(&station).unwrap_or_else(|| {
                    Err(FetchError::Task(format!("no result for {station}")))
                });
                (station, result)
            })
            .collect();

        let now = self.clock.now();
        let mut errors = vec![];
        let trains_by_station: Vec<(Station, Vec<Train>)> = fetched
            .into_iter()
            .map(|(station, result)| {
                let trains = self.cache.merge(station, result, now, &mut errors);
                (station, trains)
            })
            .collect();

        let entities = build_trip_update_entities(&self.static_data, &trains_by_station);
        debug!(
            stations = trains_by_station.len(),
            entities = entities.len(),
            errors = errors.len(),
            "Built trip updates"
        );
        CycleOutcome { entities, errors }
    }
}

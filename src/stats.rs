//! Per-cycle feed statistics and the counters exported at `/metrics`.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::SourceError;
use crate::gtfs_rt::FeedMessage;

/// Summary of one published message.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FeedStats {
    pub timestamp: Option<u64>,
    pub total_entities: usize,

    // entity types
    pub trip_updates: usize,
    pub alerts: usize,

    pub stop_time_updates: usize,
    pub informed_entities: usize,
    pub with_effect: usize,

    /// Stop-time updates keyed by `(stop_id, direction)`, direction `NJ` or `NY`.
    #[serde(serialize_with = "serialize_stop_times")]
    pub stop_times: BTreeMap<(String, &'static str), usize>,

    pub source_errors: usize,
}

impl FeedStats {
    pub fn from_feed(feed: &FeedMessage) -> Self {
        let mut s = FeedStats {
            timestamp: feed.header.timestamp,
            total_entities: feed.entity.len(),
            ..Default::default()
        };

        for e in &feed.entity {
            if let Some(update) = &e.trip_update {
                s.trip_updates += 1;

                let direction = if update.trip.direction_id.unwrap_or(0) == 0 {
                    "NJ"
                } else {
                    "NY"
                };
                for stop_time in &update.stop_time_update {
                    s.stop_time_updates += 1;
                    let stop_id = stop_time.stop_id.clone().unwrap_or_default();
                    *s.stop_times.entry((stop_id, direction)).or_default() += 1;
                }
            }

            if let Some(alert) = &e.alert {
                s.alerts += 1;
                s.informed_entities += alert.informed_entity.len();

                if alert.effect.is_some() {
                    s.with_effect += 1;
                }
            }
        }

        s
    }

    pub fn with_errors(mut self, errors: &[SourceError]) -> Self {
        self.source_errors = errors.len();
        self
    }
}

fn serialize_stop_times<S: serde::Serializer>(
    stop_times: &BTreeMap<(String, &'static str), usize>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(
        stop_times
            .iter()
            .map(|((stop_id, direction), n)| (format!("{stop_id}/{direction}"), n)),
    )
}

#[derive(Debug, Default, Serialize)]
pub struct FeedMetricsSnapshot {
    pub num_updates: u64,
    pub num_source_errors: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub latest: FeedStats,
}

/// Accumulates [`FeedStats`] across cycles for one feed.
///
/// Feed it from a cycle observer with [`FeedMetrics::record`].
#[derive(Debug)]
pub struct FeedMetrics {
    feed: &'static str,
    state: Mutex<FeedMetricsSnapshot>,
}

impl FeedMetrics {
    pub fn new(feed: &'static str) -> Self {
        Self {
            feed,
            state: Mutex::new(FeedMetricsSnapshot::default()),
        }
    }

    pub fn feed(&self) -> &'static str {
        self.feed
    }

    pub fn record(&self, message: &FeedMessage, errors: &[SourceError]) {
        let stats = FeedStats::from_feed(message).with_errors(errors);
        info!(
            feed = self.feed,
            entities = stats.total_entities,
            source_errors = stats.source_errors,
            "Feed updated"
        );

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.num_updates += 1;
        state.num_source_errors += errors.len() as u64;
        state.last_update = Some(Utc::now());
        state.latest = stats;
    }

    pub fn snapshot(&self) -> FeedMetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        FeedMetricsSnapshot {
            num_updates: state.num_updates,
            num_source_errors: state.num_source_errors,
            last_update: state.last_update,
            latest: state.latest.clone(),
        }
    }
}

/// Requests served from one feed endpoint, counted by response status code.
#[derive(Debug)]
pub struct RequestCounter {
    name: &'static str,
    help: &'static str,
    counts: Mutex<BTreeMap<u16, u64>>,
}

impl RequestCounter {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn record(&self, code: u16) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        *counts.entry(code).or_default() += 1;
    }

    /// Count per status code, in code order.
    pub fn counts(&self) -> BTreeMap<u16, u64> {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Escapes a label value for the Prometheus text format.
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn write_family(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Renders feed metrics and request counters in Prometheus text exposition
/// format. Each family is written once, followed by all of its samples.
pub fn render_prometheus(metrics: &[&FeedMetrics], requests: &[&RequestCounter]) -> String {
    let snapshots: Vec<(String, FeedMetricsSnapshot)> = metrics
        .iter()
        .map(|m| (escape_label_value(m.feed()), m.snapshot()))
        .collect();
    let mut out = String::new();

    let name = "path_train_gtfsrt_num_updates";
    write_family(&mut out, name, "counter", "Number of completed updates");
    for (feed, s) in &snapshots {
        let _ = writeln!(out, "{name}{{feed=\"{feed}\"}} {}", s.num_updates);
    }

    let name = "path_train_gtfsrt_num_source_api_errors";
    write_family(
        &mut out,
        name,
        "counter",
        "Number of errors when retrieving realtime data from the source API",
    );
    for (feed, s) in &snapshots {
        let _ = writeln!(out, "{name}{{feed=\"{feed}\"}} {}", s.num_source_errors);
    }

    let name = "path_train_gtfsrt_last_update";
    write_family(&mut out, name, "gauge", "Time of the last completed update");
    for (feed, s) in &snapshots {
        let last = s
            .last_update
            .map_or(0.0, |t| t.timestamp_millis() as f64 / 1000.0);
        let _ = writeln!(out, "{name}{{feed=\"{feed}\"}} {last}");
    }

    let name = "path_train_gtfsrt_num_trip_stop_times";
    write_family(
        &mut out,
        name,
        "gauge",
        "Number of trip stop times per station and direction",
    );
    for (feed, s) in &snapshots {
        for ((stop_id, direction), n) in &s.latest.stop_times {
            let stop_id = escape_label_value(stop_id);
            let _ = writeln!(
                out,
                "{name}{{feed=\"{feed}\",stop_id=\"{stop_id}\",direction=\"{direction}\"}} {n}"
            );
        }
    }

    let name = "path_train_gtfsrt_num_alerts";
    write_family(&mut out, name, "gauge", "Number of alerts in the latest update");
    for (feed, s) in &snapshots {
        let _ = writeln!(out, "{name}{{feed=\"{feed}\"}} {}", s.latest.alerts);
    }

    for counter in requests {
        let name = counter.name();
        write_family(&mut out, name, "counter", counter.help);
        for (code, n) in counter.counts() {
            let _ = writeln!(out, "{name}{{code=\"{code}\"}} {n}");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::gtfs_rt::trip_update::StopTimeUpdate;
    use crate::gtfs_rt::{Alert, FeedEntity, FeedHeader, TripDescriptor, TripUpdate};

    fn trip_entity(stop_id: &str, direction_id: u32) -> FeedEntity {
        FeedEntity {
            id: format!("{stop_id}-{direction_id}"),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    direction_id: Some(direction_id),
                    ..Default::default()
                },
                stop_time_update: vec![StopTimeUpdate {
                    stop_id: Some(stop_id.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn feed(entity: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "0.2".to_string(),
                timestamp: Some(1234567890),
                incrementality: None,
                feed_version: None,
            },
            entity,
        }
    }

    #[test]
    fn test_from_feed_empty() {
        let stats = FeedStats::from_feed(&feed(vec![]));

        assert_eq!(stats.total_entities, 0);
        assert_eq!(stats.trip_updates, 0);
        assert_eq!(stats.timestamp, Some(1234567890));
    }

    #[test]
    fn test_from_feed_counts_stop_times_by_direction() {
        let stats = FeedStats::from_feed(&feed(vec![
            trip_entity("26730", 0),
            trip_entity("26730", 1),
            trip_entity("26730", 1),
        ]));

        assert_eq!(stats.trip_updates, 3);
        assert_eq!(stats.stop_time_updates, 3);
        assert_eq!(stats.stop_times[&("26730".to_string(), "NJ")], 1);
        assert_eq!(stats.stop_times[&("26730".to_string(), "NY")], 2);
    }

    #[test]
    fn test_from_feed_counts_alerts() {
        let mut alert = Alert::default();
        alert.set_effect(crate::gtfs_rt::alert::Effect::SignificantDelays);
        let stats = FeedStats::from_feed(&feed(vec![FeedEntity {
            id: "a".to_string(),
            alert: Some(alert),
            ..Default::default()
        }]));

        assert_eq!(stats.alerts, 1);
        assert_eq!(stats.with_effect, 1);
    }

    #[test]
    fn test_record_accumulates() {
        let metrics = FeedMetrics::new("trip_updates");
        let errors = vec![SourceError::new(
            "HOBOKEN",
            FetchError::Upstream("x".to_string()),
        )];
        metrics.record(&feed(vec![trip_entity("1", 0)]), &[]);
        metrics.record(&feed(vec![]), &errors);

        let s = metrics.snapshot();
        assert_eq!(s.num_updates, 2);
        assert_eq!(s.num_source_errors, 1);
        assert!(s.last_update.is_some());
        assert_eq!(s.latest.total_entities, 0);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = FeedMetrics::new("trip_updates");
        metrics.record(&feed(vec![trip_entity("26730", 1)]), &[]);

        let text = render_prometheus(&[&metrics], &[]);

        assert!(text.contains("# TYPE path_train_gtfsrt_num_updates counter"));
        assert!(text.contains("path_train_gtfsrt_num_updates{feed=\"trip_updates\"} 1"));
        assert!(text.contains(
            "path_train_gtfsrt_num_trip_stop_times{feed=\"trip_updates\",stop_id=\"26730\",direction=\"NY\"} 1"
        ));
    }

    #[test]
    fn test_render_prometheus_groups_families_across_feeds() {
        let trips = FeedMetrics::new("trip_updates");
        let alerts = FeedMetrics::new("alerts");

        let text = render_prometheus(&[&trips, &alerts], &[]);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(text.matches("# TYPE path_train_gtfsrt_num_updates ").count(), 1);
        let first = lines
            .iter()
            .position(|l| l.starts_with("path_train_gtfsrt_num_updates{"))
            .unwrap();
        assert_eq!(
            lines[first + 1],
            "path_train_gtfsrt_num_updates{feed=\"alerts\"} 0"
        );
    }

    #[test]
    fn test_render_prometheus_escapes_label_values() {
        let metrics = FeedMetrics::new("trip_updates");
        metrics.record(&feed(vec![trip_entity("a\"b\nc\\d", 1)]), &[]);

        let text = render_prometheus(&[&metrics], &[]);

        assert!(text.contains(
            "path_train_gtfsrt_num_trip_stop_times{feed=\"trip_updates\",stop_id=\"a\\\"b\\nc\\\\d\",direction=\"NY\"} 1\n"
        ));
        assert!(
            text.lines()
                .all(|l| l.starts_with('#') || l.starts_with("path_train_gtfsrt_"))
        );
    }

    #[test]
    fn test_request_counts_by_code() {
        let requests = RequestCounter::new(
            "path_train_gtfsrt_trip_feed_num_requests",
            "Number of requests for the trip update feed",
        );
        requests.record(200);
        requests.record(200);
        requests.record(404);

        assert_eq!(requests.counts(), BTreeMap::from([(200, 2), (404, 1)]));
        let text = render_prometheus(&[], &[&requests]);
        assert!(text.contains("# TYPE path_train_gtfsrt_trip_feed_num_requests counter"));
        assert!(text.contains("path_train_gtfsrt_trip_feed_num_requests{code=\"200\"} 2"));
        assert!(text.contains("path_train_gtfsrt_trip_feed_num_requests{code=\"404\"} 1"));
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let metrics = FeedMetrics::new("trip_updates");
        metrics.record(&feed(vec![trip_entity("26730", 1)]), &[]);

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["num_updates"], 1);
        assert_eq!(json["latest"]["stop_times"]["26730/NY"], 1);
    }
}

//! Alert feed: Port Authority service incidents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::cache::SourceCache;
use super::{CycleOutcome, CycleRunner};
use crate::clock::Clock;
use crate::error::FetchError;
use crate::gtfs_rt::alert::Effect;
use crate::gtfs_rt::translated_string::Translation;
use crate::gtfs_rt::{Alert, EntitySelector, FeedEntity, TranslatedString};
use crate::source::{Incident, IncidentSource, Route, Station};
use crate::static_data::StaticData;

/// Agency id of PATH in the published static GTFS.
pub const AGENCY_ID: &str = "151";

const INCIDENTS_SOURCE_KEY: &str = "port_authority_incidents";

const STATION_VARIABLE: &str = "Station";
const LINES_VARIABLE: &str = "Lines";
const STATUS_VARIABLE: &str = "Status";

/// Status fragments and the effect they imply. First match wins.
const STATUS_EFFECTS: &[(&str, Effect)] = &[
    ("suspend", Effect::NoService),
    ("delayed", Effect::SignificantDelays),
    ("detour", Effect::Detour),
    ("reduced", Effect::ReducedService),
    ("modified", Effect::ModifiedService),
];

/// Builds one alert entity per incident, in order. Incidents are never dropped.
pub fn build_alert_entities(static_data: &StaticData, incidents: &[Incident]) -> Vec<FeedEntity> {
    incidents
        .iter()
        .enumerate()
        .map(|(n, incident)| FeedEntity {
            id: format!("alert-{n}"),
            alert: Some(alert(static_data, incident)),
            ..Default::default()
        })
        .collect()
}

fn alert(static_data: &StaticData, incident: &Incident) -> Alert {
    let mut alert = Alert {
        header_text: Some(english(&incident.subject)),
        description_text: Some(english(&incident.pre_message)),
        informed_entity: informed_entities(static_data, incident),
        ..Default::default()
    };
    if let Some(effect) = incident
        .variable(STATUS_VARIABLE)
        .and_then(|values| values.iter().find_map(|v| effect_for_status(v)))
    {
        alert.set_effect(effect);
    }
    alert
}

/// Selectors in fixed order: the station, then each line, or the whole
/// agency when the incident names neither.
fn informed_entities(static_data: &StaticData, incident: &Incident) -> Vec<EntitySelector> {
    let station = incident.variable(STATION_VARIABLE);
    let lines = incident.variable(LINES_VARIABLE);

    if station.is_none() && lines.is_none() {
        return vec![EntitySelector {
            agency_id: Some(AGENCY_ID.to_string()),
            ..Default::default()
        }];
    }

    let mut selectors = vec![];
    if let Some(stop_id) = station
        .and_then(|values| values.first())
        .and_then(|code| Station::from_port_authority_code(code))
        .and_then(|station| static_data.stop_id(station))
    {
        selectors.push(EntitySelector {
            stop_id: Some(stop_id.to_string()),
            ..Default::default()
        });
    }
    for route_id in lines
        .unwrap_or_default()
        .iter()
        .filter_map(|code| Route::from_port_authority_code(code))
        .filter_map(|route| static_data.route_id(route))
    {
        selectors.push(EntitySelector {
            route_id: Some(route_id.to_string()),
            ..Default::default()
        });
    }
    selectors
}

fn effect_for_status(status: &str) -> Option<Effect> {
    let status = status.to_lowercase();
    STATUS_EFFECTS
        .iter()
        .find(|(fragment, _)| status.contains(*fragment))
        .map(|(_, effect)| *effect)
}

fn english(text: &str) -> TranslatedString {
    TranslatedString {
        translation: vec![Translation {
            text: text.to_string(),
            language: Some("en".to_string()),
        }],
    }
}

/// Cycle runner for the alert feed. The incident feed is a single source key.
pub struct AlertRunner {
    source: Arc<dyn IncidentSource>,
    static_data: Arc<StaticData>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    cache: SourceCache<&'static str, Incident>,
}

impl AlertRunner {
    pub fn new(
        source: Arc<dyn IncidentSource>,
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
impl CycleRunner for AlertRunner {
    async fn run_cycle(&mut self) -> CycleOutcome {
        let fetched = match tokio::time::timeout(self.timeout, self.source.incidents()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        let mut errors = vec![];
        let incidents = self
            .cache
            .merge(INCIDENTS_SOURCE_KEY, fetched, self.clock.now(), &mut errors);
        let entities = build_alert_entities(&self.static_data, &incidents);
        debug!(
            incidents = incidents.len(),
            errors = errors.len(),
            "Built alerts"
        );
        CycleOutcome { entities, errors }
    }
}

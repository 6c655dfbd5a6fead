//! Identifier mappings resolved once at startup.

use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::error::FetchError;
use crate::source::{Route, Station, TrainSource};

/// Maps source-side stations and routes to published GTFS identifiers.
///
/// A missing entry means the station or route is unmapped: anything that
/// references it is left out of the feed rather than given a made-up id.
#[derive(Debug, Clone, Default)]
pub struct StaticData {
    station_to_stop_id: BTreeMap<Station, String>,
    route_to_route_id: HashMap<Route, String>,
}

impl StaticData {
    pub fn new(
        station_to_stop_id: impl IntoIterator<Item = (Station, String)>,
        route_to_route_id: impl IntoIterator<Item = (Route, String)>,
    ) -> Self {
        Self {
            station_to_stop_id: station_to_stop_id.into_iter().collect(),
            route_to_route_id: route_to_route_id.into_iter().collect(),
        }
    }

    /// Queries both mappings from `source`. Either failing fails the whole resolution.
    #[tracing::instrument(skip(source))]
    pub async fn resolve(source: &dyn TrainSource) -> Result<Self, FetchError> {
        let stations = source.station_stop_ids().await?;
        let routes = source.route_ids().await?;
        info!(
            stations = stations.len(),
            routes = routes.len(),
            "Resolved static identifiers"
        );
        Ok(Self::new(stations, routes))
    }

    pub fn stop_id(&self, station: Station) -> Option<&str> {
        self.station_to_stop_id.get(&station).map(String::as_str)
    }

    pub fn route_id(&self, route: Route) -> Option<&str> {
        self.route_to_route_id.get(&route).map(String::as_str)
    }

    /// Mapped stations in polling order.
    pub fn stations(&self) -> impl Iterator<Item = Station> + '_ {
        self.station_to_stop_id.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stations_iterate_in_fixed_order() {
        let data = StaticData::new(
            [
                (Station::FourteenthStreet, "stop14".to_string()),
                (Station::Hoboken, "stopHob".to_string()),
                (Station::Newark, "stopNwk".to_string()),
            ],
            [],
        );
        let stations: Vec<_> = data.stations().collect();
        assert_eq!(
            stations,
            vec![Station::Newark, Station::Hoboken, Station::FourteenthStreet]
        );
    }

    #[test]
    fn test_unmapped_lookups_are_none() {
        let data = StaticData::new(
            [(Station::Hoboken, "stopHob".to_string())],
            [(Route::Hob33, "route1".to_string())],
        );
        assert_eq!(data.stop_id(Station::Hoboken), Some("stopHob"));
        assert_eq!(data.stop_id(Station::Harrison), None);
        assert_eq!(data.route_id(Route::Hob33), Some("route1"));
        assert_eq!(data.route_id(Route::NwkWtc), None);
    }
}

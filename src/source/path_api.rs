use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Direction, Route, Station, Train, TrainSource};
use crate::error::FetchError;
use crate::fetch::{HttpClient, fetch_bytes};

pub const DEFAULT_BASE_URL: &str = "https://path.api.razza.dev/v1/";

#[derive(Deserialize)]
struct StationsResponse {
    #[serde(default)]
    stations: Vec<StationEntry>,
}

#[derive(Deserialize)]
struct StationEntry {
    station: String,
    id: String,
}

#[derive(Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

#[derive(Deserialize)]
struct RouteEntry {
    route: String,
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeResponse {
    #[serde(default)]
    upcoming_trains: Vec<UpcomingTrain>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpcomingTrain {
    route: Option<String>,
    direction: Option<String>,
    projected_arrival: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
}

impl From<UpcomingTrain> for Train {
    fn from(raw: UpcomingTrain) -> Self {
        Train {
            route: raw.route.and_then(|r| r.parse().ok()),
            direction: raw.direction.and_then(|d| d.parse::<Direction>().ok()),
            projected_arrival: raw.projected_arrival,
            last_updated: raw.last_updated,
        }
    }
}

/// Client for the JSON PATH realtime API.
pub struct PathApiClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl PathApiClient {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { http, base_url }
    }

    async fn get(&self, endpoint: &str) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "Querying PATH API");
        fetch_bytes(self.http.as_ref(), &url).await
    }
}

#[async_trait]
impl TrainSource for PathApiClient {
    async fn station_stop_ids(&self) -> Result<HashMap<Station, String>, FetchError> {
        let body = self.get("stations").await?;
        parse_stations(&body)
    }

    async fn route_ids(&self) -> Result<HashMap<Route, String>, FetchError> {
        let body = self.get("routes").await?;
        parse_routes(&body)
    }

    async fn trains_at_station(&self, station: Station) -> Result<Vec<Train>, FetchError> {
        let endpoint = format!("stations/{}/realtime", station.as_str().to_lowercase());
        let body = self.get(&endpoint).await?;
        parse_trains(&body)
    }
}

fn parse_stations(body: &[u8]) -> Result<HashMap<Station, String>, FetchError> {
    let resp: StationsResponse = serde_json::from_slice(body)?;
    let mut stations = HashMap::new();
    for entry in resp.stations {
        match entry.station.parse::<Station>() {
            Ok(station) => {
                stations.insert(station, entry.id);
            }
            Err(e) => warn!(error = %e, "Skipping station from source API"),
        }
    }
    Ok(stations)
}

fn parse_routes(body: &[u8]) -> Result<HashMap<Route, String>, FetchError> {
    let resp: RoutesResponse = serde_json::from_slice(body)?;
    let mut routes = HashMap::new();
    for entry in resp.routes {
        match entry.route.parse::<Route>() {
            Ok(route) => {
                routes.insert(route, entry.id);
            }
            Err(e) => warn!(error = %e, "Skipping route from source API"),
        }
    }
    Ok(routes)
}

fn parse_trains(body: &[u8]) -> Result<Vec<Train>, FetchError> {
    let resp: RealtimeResponse = serde_json::from_slice(body)?;
    Ok(resp.upcoming_trains.into_iter().map(Train::from).collect())
}

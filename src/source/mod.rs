//! Upstream data sources and the raw records they return.
//!
//! [`TrainSource`] provides per-station train predictions plus the static
//! identifier mappings; [`IncidentSource`] provides service incidents.
//! [`PathApiClient`] and [`PortAuthorityClient`] are the HTTP
//! implementations used by the binary.

mod path_api;
mod port_authority;

pub use path_api::{DEFAULT_BASE_URL, PathApiClient};
pub use port_authority::{INCIDENTS_URL, PortAuthorityClient};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;

/// A PATH station, in the fixed order stations are polled and published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Station {
    Newark,
    Harrison,
    JournalSquare,
    GroveStreet,
    ExchangePlace,
    WorldTradeCenter,
    Newport,
    Hoboken,
    ChristopherStreet,
    NinthStreet,
    FourteenthStreet,
    TwentyThirdStreet,
    ThirtyThirdStreet,
}

impl Station {
    pub const ALL: [Station; 13] = [
        Station::Newark,
        Station::Harrison,
        Station::JournalSquare,
        Station::GroveStreet,
        Station::ExchangePlace,
        Station::WorldTradeCenter,
        Station::Newport,
        Station::Hoboken,
        Station::ChristopherStreet,
        Station::NinthStreet,
        Station::FourteenthStreet,
        Station::TwentyThirdStreet,
        Station::ThirtyThirdStreet,
    ];

    /// Name used by the PATH source API.
    pub fn as_str(self) -> &'static str {
        match self {
            Station::Newark => "NEWARK",
            Station::Harrison => "HARRISON",
            Station::JournalSquare => "JOURNAL_SQUARE",
            Station::GroveStreet => "GROVE_STREET",
            Station::ExchangePlace => "EXCHANGE_PLACE",
            Station::WorldTradeCenter => "WORLD_TRADE_CENTER",
            Station::Newport => "NEWPORT",
            Station::Hoboken => "HOBOKEN",
            Station::ChristopherStreet => "CHRISTOPHER_STREET",
            Station::NinthStreet => "NINTH_STREET",
            Station::FourteenthStreet => "FOURTEENTH_STREET",
            Station::TwentyThirdStreet => "TWENTY_THIRD_STREET",
            Station::ThirtyThirdStreet => "THIRTY_THIRD_STREET",
        }
    }

    /// Code used by the Port Authority incident feed, e.g. `14S`.
    pub fn port_authority_code(self) -> &'static str {
        match self {
            Station::Newark => "NWK",
            Station::Harrison => "HAR",
            Station::JournalSquare => "JSQ",
            Station::GroveStreet => "GRV",
            Station::ExchangePlace => "EXP",
            Station::WorldTradeCenter => "WTC",
            Station::Newport => "NEW",
            Station::Hoboken => "HOB",
            Station::ChristopherStreet => "CHR",
            Station::NinthStreet => "09S",
            Station::FourteenthStreet => "14S",
            Station::TwentyThirdStreet => "23S",
            Station::ThirtyThirdStreet => "33S",
        }
    }

    pub fn from_port_authority_code(code: &str) -> Option<Station> {
        let code = code.trim();
        Station::ALL
            .into_iter()
            .find(|s| s.port_authority_code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Station {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Station::ALL
            .into_iter()
            .find(|station| station.as_str() == s)
            .ok_or_else(|| format!("unknown station {s}"))
    }
}

/// A PATH line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Route {
    Jsq33,
    Hob33,
    HobWtc,
    NwkWtc,
    Jsq33ViaHob,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Jsq33,
        Route::Hob33,
        Route::HobWtc,
        Route::NwkWtc,
        Route::Jsq33ViaHob,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Route::Jsq33 => "JSQ_33",
            Route::Hob33 => "HOB_33",
            Route::HobWtc => "HOB_WTC",
            Route::NwkWtc => "NWK_WTC",
            Route::Jsq33ViaHob => "JSQ_33_HOB",
        }
    }

    /// Line code used by the Port Authority incident feed, e.g. `HOB-33S`.
    pub fn port_authority_code(self) -> &'static str {
        match self {
            Route::Jsq33 => "JSQ-33S",
            Route::Hob33 => "HOB-33S",
            Route::HobWtc => "HOB-WTC",
            Route::NwkWtc => "NWK-WTC",
            Route::Jsq33ViaHob => "JSQ-HOB-33S",
        }
    }

    pub fn from_port_authority_code(code: &str) -> Option<Route> {
        let code = code.trim();
        Route::ALL
            .into_iter()
            .find(|r| r.port_authority_code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Route::ALL
            .into_iter()
            .find(|route| route.as_str() == s)
            .ok_or_else(|| format!("unknown route {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToNj,
    ToNy,
}

impl Direction {
    /// GTFS `direction_id`: trains to New Jersey are 0, trains to New York are 1.
    pub fn direction_id(self) -> u32 {
        match self {
            Direction::ToNj => 0,
            Direction::ToNy => 1,
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TO_NJ" => Ok(Direction::ToNj),
            "TO_NY" => Ok(Direction::ToNy),
            other => Err(format!("unknown direction {other}")),
        }
    }
}

/// One upcoming train reported at a station.
///
/// Every field is optional because upstream may omit any of them; trains
/// missing a field are left out of the published feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Train {
    pub route: Option<Route>,
    pub direction: Option<Direction>,
    pub projected_arrival: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// A service incident published by the Port Authority.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Incident {
    pub subject: String,
    pub pre_message: String,
    pub form_variable_items: Vec<FormVariableItem>,
}

impl Incident {
    /// Values of the first form variable called `name`.
    pub fn variable(&self, name: &str) -> Option<&[String]> {
        self.form_variable_items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.values.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormVariableItem {
    pub name: String,
    pub values: Vec<String>,
}

/// Source of train predictions and of the identifier mappings used to
/// publish them.
#[async_trait]
pub trait TrainSource: Send + Sync {
    /// Maps each station to its published GTFS stop id.
    async fn station_stop_ids(&self) -> Result<HashMap<Station, String>, FetchError>;

    /// Maps each route to its published GTFS route id.
    async fn route_ids(&self) -> Result<HashMap<Route, String>, FetchError>;

    async fn trains_at_station(&self, station: Station) -> Result<Vec<Train>, FetchError>;
}

#[async_trait]
pub trait IncidentSource: Send + Sync {
    async fn incidents(&self) -> Result<Vec<Incident>, FetchError>;
}

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{FormVariableItem, Incident, IncidentSource};
use crate::error::FetchError;
use crate::fetch::{HttpClient, fetch_bytes};

pub const INCIDENTS_URL: &str = "https://www.panynj.gov/bin/portauthority/everbridge/incidents?status=All&department=Path";

#[derive(Deserialize)]
struct IncidentsResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Vec<IncidentEnvelope>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncidentEnvelope {
    #[serde(default)]
    incident_message: IncidentMessage,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncidentMessage {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    pre_message: String,
    #[serde(default)]
    form_variable_items: Vec<RawFormVariableItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFormVariableItem {
    #[serde(default)]
    variable_name: String,
    #[serde(default)]
    val: Vec<String>,
}

/// Client for the Port Authority's Everbridge incident feed.
pub struct PortAuthorityClient {
    http: Arc<dyn HttpClient>,
    url: String,
}

impl PortAuthorityClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self::with_url(http, INCIDENTS_URL)
    }

    pub fn with_url(http: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl IncidentSource for PortAuthorityClient {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn incidents(&self) -> Result<Vec<Incident>, FetchError> {
        let body = fetch_bytes(self.http.as_ref(), &self.url).await?;
        let incidents = parse_incidents(&body)?;
        debug!(count = incidents.len(), "Fetched Port Authority incidents");
        Ok(incidents)
    }
}

fn parse_incidents(body: &[u8]) -> Result<Vec<Incident>, FetchError> {
    let resp: IncidentsResponse = serde_json::from_slice(body)?;
    if resp.status != "Success" {
        return Err(FetchError::Upstream(format!(
            "error getting incidents: {}",
            resp.status
        )));
    }

    Ok(resp
        .data
        .into_iter()
        .map(|envelope| {
            let msg = envelope.incident_message;
            Incident {
                subject: msg.subject,
                pre_message: msg.pre_message,
                form_variable_items: msg
                    .form_variable_items
                    .into_iter()
                    .map(|item| FormVariableItem {
                        name: item.variable_name,
                        values: item.val,
                    })
                    .collect(),
            }
        })
        .collect())
}

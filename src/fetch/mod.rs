//! Minimal HTTP plumbing shared by the upstream clients.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use tracing::debug;

use crate::error::FetchError;

/// Fetches `url` and returns the body, treating any non-2xx status as an error.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<Vec<u8>, FetchError> {
    let url = url
        .parse::<reqwest::Url>()
        .map_err(|e| FetchError::Url(format!("{url}: {e}")))?;
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = resp.bytes().await?;
    debug!(bytes = bytes.len(), "Fetched upstream response");
    Ok(bytes.to_vec())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::HttpClient;

    /// Serves fixed responses keyed by full URL; anything else is a 404.
    #[derive(Default)]
    pub struct CannedClient {
        responses: HashMap<String, (u16, String)>,
    }

    impl CannedClient {
        pub fn with(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses
                .insert(url.to_string(), (status, body.to_string()));
            self
        }
    }

    #[async_trait]
    impl HttpClient for CannedClient {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let (status, body) = self
                .responses
                .get(req.url().as_str())
                .cloned()
                .unwrap_or((404, "not found".to_string()));
            let resp = axum::http::Response::builder()
                .status(status)
                .body(body)
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }
}

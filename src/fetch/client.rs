use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes HTTP requests for the upstream clients.
///
/// Implemented by [`super::BasicClient`] in production and by canned
/// responders in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

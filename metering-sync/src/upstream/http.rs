use std::time::Duration;

use super::{TransportError, UpstreamClient, UpstreamResponse};

/// `UpstreamClient` talking to the metering API over HTTPS.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpUpstream {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/", self.base_url, endpoint.trim_matches('/'))
    }
}

#[async_trait::async_trait]
impl UpstreamClient for HttpUpstream {
    async fn get(&self, endpoint: &str) -> Result<UpstreamResponse, TransportError> {
        let url = self.url(endpoint);
        tracing::debug!(%url, "querying metering api");

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError(format!("request to {url} timed out"))
                } else {
                    TransportError(format!("request to {url} failed: {e}"))
                }
            })?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("failed to read response body: {e}")))?;

        Ok(UpstreamResponse { status_code, body })
    }
}

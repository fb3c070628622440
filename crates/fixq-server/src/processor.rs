//! Processing routine reached over HTTP.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use fixq_core::config::ProcessorConfig;
use fixq_core::domain::RequestId;
use fixq_core::error::{QueueError, QueueResult};
use fixq_core::ports::RequestProcessor;

/// Calls `GET {base_url}/{request_id}` and hands back the JSON body.
///
/// The request id is one percent-encoded path segment.
pub struct HttpProcessor {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpProcessor {
    pub fn new(config: &ProcessorConfig) -> QueueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| QueueError::config(format!("http client: {e}")))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| QueueError::config(format!("processor base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(QueueError::config(format!(
                "processor base url cannot take a path: {base_url}"
            )));
        }
        Ok(Self { client, base_url })
    }

    fn url(&self, request_id: &RequestId) -> QueueResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| QueueError::config(format!("processor base url: {}", self.base_url)))?
            .pop_if_empty()
            .push(request_id.as_str());
        Ok(url)
    }
}

#[async_trait]
impl RequestProcessor for HttpProcessor {
    async fn process(&self, request_id: &RequestId) -> QueueResult<Value> {
        let url = self.url(request_id)?;
        debug!(request_id = %request_id, %url, "calling processing routine");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| QueueError::Processing(format!("GET {url}: {e}")))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| QueueError::Processing(format!("invalid response from {url}: {e}")))
    }
}

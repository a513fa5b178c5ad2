//! Generic JSON API source.
//!
//! Fetches `GET <template>` where the template may reference `{code}`,
//! `{cnpj}` and `{external_id}`, and decodes the body into the payload type of
//! the configured category.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{SourceAdapter, SourceError};
use crate::category::Category;
use crate::types::{CollectRequest, Collected, Payload};

/// Source backed by a JSON HTTP endpoint.
pub struct JsonApiSource {
    /// Name for logging
    name: String,
    /// Category whose payload the body decodes into
    category: Category,
    /// URL template
    url_template: String,
    /// HTTP client
    client: reqwest::Client,
}

impl JsonApiSource {
    /// Create a new source with the given request timeout.
    pub fn new(category: Category, url_template: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fundwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: format!("json-{}", category.name()),
            category,
            url_template: url_template.into(),
            client,
        }
    }

    /// Render the URL template for a request.
    ///
    /// Fails when the template references an identifier the fund lacks.
    pub fn render_url(&self, request: &CollectRequest) -> Result<String, SourceError> {
        let mut url = self.url_template.clone();
        for (placeholder, value) in [
            ("{code}", &request.fund_code),
            ("{cnpj}", &request.cnpj),
            ("{external_id}", &request.external_id),
        ] {
            if url.contains(placeholder) {
                if value.is_empty() {
                    return Err(SourceError::InvalidRequest(format!(
                        "{} requires {} but the fund has none",
                        self.name, placeholder
                    )));
                }
                url = url.replace(placeholder, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for JsonApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, request: &CollectRequest) -> Result<Collected, SourceError> {
        let url = self.render_url(request)?;

        debug!(source = %self.name, url = %url, "Fetching");

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Network("Request timeout".into())
                } else if e.is_connect() {
                    SourceError::Network("Connection failed".into())
                } else {
                    SourceError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited(self.name.clone()));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(request.fund_code.clone()));
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("invalid JSON: {}", e)))?;

        let payload = Payload::from_json(self.category, body)
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(Collected::now(payload))
    }
}

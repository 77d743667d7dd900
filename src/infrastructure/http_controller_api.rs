// HTTP controller API implementation
use crate::application::controller_api::{ControllerApi, ControllerLink};
use crate::domain::controller::ControllerState;
use crate::domain::series::HistorySeries;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpControllerApi {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpControllerApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid controller base url {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { base_url, client })
    }

    /// Hrefs may be absolute or relative to the controller server.
    fn resolve(&self, href: &str) -> Result<Url> {
        self.base_url
            .join(href)
            .with_context(|| format!("invalid controller href {href}"))
    }

    fn history_url(&self, href: &str) -> Result<Url> {
        self.resolve(&format!("{}/datahistory", href.trim_end_matches('/')))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!(%url, "fetching");
        let response = self
            .client
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GET {} failed with status {}: {}", url, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {url}"))
    }
}

#[async_trait]
impl ControllerApi for HttpControllerApi {
    async fn list_controllers(&self) -> Result<BTreeMap<String, ControllerLink>> {
        let url = self.resolve("/controllers")?;
        let listed: BTreeMap<String, ControllerLink> = self.get_json(url).await?;

        // Relative hrefs are made absolute so the live channel URL can be
        // resolved against them later.
        listed
            .into_iter()
            .map(|(id, link)| {
                let href = self.resolve(&link.href)?.to_string();
                Ok((id, ControllerLink { href }))
            })
            .collect()
    }

    async fn fetch_snapshot(&self, href: &str) -> Result<ControllerState> {
        self.get_json(self.resolve(href)?).await
    }

    async fn fetch_history(&self, href: &str) -> Result<HistorySeries> {
        self.get_json(self.history_url(href)?).await
    }
}

// Controller API trait for snapshot, history and listing fetches
use crate::domain::controller::ControllerState;
use crate::domain::series::HistorySeries;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// Entry of the `/controllers` listing. Older controller servers call the
/// field `url`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControllerLink {
    #[serde(alias = "url")]
    pub href: String,
}

#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// List known controllers by id
    async fn list_controllers(&self) -> anyhow::Result<BTreeMap<String, ControllerLink>>;

    /// Current state of one controller, including its live channel URL
    async fn fetch_snapshot(&self, href: &str) -> anyhow::Result<ControllerState>;

    /// Historical series kept by the controller
    async fn fetch_history(&self, href: &str) -> anyhow::Result<HistorySeries>;

    /// Resolve the snapshot's `wsUrl` (usually a path) against the controller href
    fn channel_url(&self, href: &str, ws_url: &str) -> anyhow::Result<String> {
        let base =
            Url::parse(href).with_context(|| format!("controller href {href} is not absolute"))?;
        let url = base
            .join(ws_url)
            .with_context(|| format!("cannot resolve live channel url {ws_url}"))?;
        Ok(url.to_string())
    }
}

// Controller registry - one session per known controller
use crate::application::chart::{PlotData, SurfaceFactory};
use crate::application::controller_api::{ControllerApi, ControllerLink};
use crate::application::session::{ControllerSession, SessionConfig, SessionHandle};
use crate::application::transport::Transport;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

pub struct ControllerEntry {
    pub href: String,
    pub session: SessionHandle,
    pub chart: watch::Receiver<PlotData>,
}

pub struct ControllerRegistry {
    api: Arc<dyn ControllerApi>,
    transport: Arc<dyn Transport>,
    surfaces: Arc<dyn SurfaceFactory>,
    config: SessionConfig,
    controllers: BTreeMap<String, ControllerEntry>,
}

impl ControllerRegistry {
    pub fn new(
        api: Arc<dyn ControllerApi>,
        transport: Arc<dyn Transport>,
        surfaces: Arc<dyn SurfaceFactory>,
        config: SessionConfig,
    ) -> Self {
        Self {
            api,
            transport,
            surfaces,
            config,
            controllers: BTreeMap::new(),
        }
    }

    /// Fetch the controller listing and reconcile sessions with it.
    pub async fn discover(&mut self) -> anyhow::Result<Vec<String>> {
        let listed = self.api.list_controllers().await?;
        Ok(self.reconcile(listed))
    }

    /// Start sessions for new controllers and tear down sessions whose
    /// controller is no longer listed. Existing sessions are left alone,
    /// unless the controller moved to a different href.
    pub fn reconcile(&mut self, listed: BTreeMap<String, ControllerLink>) -> Vec<String> {
        self.controllers.retain(|id, entry| {
            let keep = listed.get(id).is_some_and(|link| link.href == entry.href);
            if !keep {
                tracing::info!(controller = %id, "controller gone; tearing down session");
            }
            keep
        });

        for (id, link) in listed {
            if !self.controllers.contains_key(&id) {
                self.attach(id, link.href);
            }
        }
        self.ids()
    }

    fn attach(&mut self, id: String, href: String) {
        tracing::info!(controller = %id, %href, "starting controller session");
        let (surface, chart) = self.surfaces.create();
        let session = ControllerSession::spawn(
            href.clone(),
            self.api.clone(),
            self.transport.clone(),
            surface,
            &self.config,
        );
        self.controllers.insert(id, ControllerEntry { href, session, chart });
    }

    pub fn get(&self, id: &str) -> Option<&ControllerEntry> {
        self.controllers.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ControllerEntry)> {
        self.controllers.iter()
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.controllers.remove(id).is_some()
    }

    pub fn shutdown_all(&mut self) {
        let count = self.controllers.len();
        self.controllers.clear();
        tracing::info!(count, "all controller sessions shut down");
    }
}

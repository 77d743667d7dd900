// In-memory fakes for the application seams
use crate::application::chart::{AxisConfig, AxisId, ChartSurface, SeriesKind, SeriesStyle};
use crate::application::controller_api::{ControllerApi, ControllerLink};
use crate::application::transport::{Link, LinkEnd, Transport, TransportError};
use crate::domain::controller::ControllerState;
use crate::domain::series::HistorySeries;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[derive(Default)]
pub struct FakeTransport {
    urls: Mutex<Vec<String>>,
    links: Mutex<Vec<LinkEnd>>,
    refuse: AtomicUsize,
    close: AtomicUsize,
}

impl FakeTransport {
    /// Fail the next `n` connects during the handshake.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Accept the next `n` connects and close them straight away.
    pub fn close_next(&self, n: usize) {
        self.close.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn has_link(&self) -> bool {
        !self.links.lock().unwrap().is_empty()
    }

    pub fn take_link(&self) -> LinkEnd {
        self.links.lock().unwrap().pop().expect("no open link")
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        if take_one(&self.refuse) {
            return Err(TransportError::Handshake("connection refused".to_string()));
        }
        let (link, end) = Link::pair(16);
        if !take_one(&self.close) {
            self.links.lock().unwrap().push(end);
        }
        Ok(link)
    }
}

#[derive(Default)]
pub struct FakeApi {
    pub controllers: Mutex<BTreeMap<String, ControllerLink>>,
    pub snapshot: ControllerState,
    pub history: HistorySeries,
    pub snapshot_failures: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    pub snapshot_gate: Option<Arc<Notify>>,
    pub history_gate: Option<Arc<Notify>>,
}

impl FakeApi {
    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControllerApi for FakeApi {
    async fn list_controllers(&self) -> anyhow::Result<BTreeMap<String, ControllerLink>> {
        Ok(self.controllers.lock().unwrap().clone())
    }

    async fn fetch_snapshot(&self, _href: &str) -> anyhow::Result<ControllerState> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.snapshot_gate {
            gate.notified().await;
        }
        if take_one(&self.snapshot_failures) {
            anyhow::bail!("controller unreachable");
        }
        Ok(self.snapshot.clone())
    }

    async fn fetch_history(&self, _href: &str) -> anyhow::Result<HistorySeries> {
        if let Some(gate) = &self.history_gate {
            gate.notified().await;
        }
        Ok(self.history.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Configure(usize),
    AddAxis(AxisId),
    AddSeries(SeriesKind),
    Load(usize),
    Push { label: i64, kinds: Vec<SeriesKind> },
    Render,
}

pub struct RecordingSurface {
    events: Arc<Mutex<Vec<SurfaceEvent>>>,
}

impl RecordingSurface {
    pub fn new() -> (Self, Arc<Mutex<Vec<SurfaceEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: events.clone(),
            },
            events,
        )
    }

    fn record(&self, event: SurfaceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ChartSurface for RecordingSurface {
    fn configure(&mut self, axes: &[AxisConfig]) {
        self.record(SurfaceEvent::Configure(axes.len()));
    }

    fn add_axis(&mut self, axis: &AxisConfig) {
        self.record(SurfaceEvent::AddAxis(axis.id));
    }

    fn add_series(&mut self, series: &SeriesStyle) {
        self.record(SurfaceEvent::AddSeries(series.kind));
    }

    fn load(&mut self, labels: &[i64], _series: &[(SeriesKind, &[Option<f64>])]) {
        self.record(SurfaceEvent::Load(labels.len()));
    }

    fn push_point(&mut self, label: i64, values: &[(SeriesKind, Option<f64>)]) {
        self.record(SurfaceEvent::Push {
            label,
            kinds: values.iter().map(|(kind, _)| *kind).collect(),
        });
    }

    fn render(&mut self) {
        self.record(SurfaceEvent::Render);
    }
}

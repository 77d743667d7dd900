// Controller session - snapshot, live channel and chart for one controller
use crate::application::chart::{ChartAdapter, ChartSurface};
use crate::application::controller_api::ControllerApi;
use crate::application::live_channel::{
    CommandSender, ConnectionState, LiveChannel, LiveChannelError, ReceivedDelta, ReconnectPolicy,
};
use crate::application::transport::Transport;
use crate::domain::controller::{Command, ControllerState};
use crate::domain::series::{HistorySeries, Sample};
use crate::infrastructure::config::ChartStyle;
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Error { message: String },
    Live,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub retry_delay: Duration,
    pub reconnect: ReconnectPolicy,
    pub chart: ChartStyle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            chart: ChartStyle::default(),
        }
    }
}

/// Runtime for one controller. It runs as a single task and is the only
/// writer of the controller state; readers go through [`SessionHandle`].
pub struct ControllerSession {
    href: String,
    api: Arc<dyn ControllerApi>,
    channel: LiveChannel,
    chart: ChartAdapter,
    state: watch::Sender<ControllerState>,
    phase: watch::Sender<SessionPhase>,
    retry_delay: Duration,
}

impl ControllerSession {
    pub fn spawn(
        href: impl Into<String>,
        api: Arc<dyn ControllerApi>,
        transport: Arc<dyn Transport>,
        surface: Box<dyn ChartSurface>,
        config: &SessionConfig,
    ) -> SessionHandle {
        let (state, state_rx) = watch::channel(ControllerState::default());
        let (phase, phase_rx) = watch::channel(SessionPhase::Uninitialized);
        let channel = LiveChannel::new(transport, config.reconnect.clone());
        let commands = channel.sender();
        let connection = channel.subscribe_state();

        let session = Self {
            href: href.into(),
            api,
            channel,
            chart: ChartAdapter::new(surface, &config.chart),
            state,
            phase,
            retry_delay: config.retry_delay,
        };
        let task = tokio::spawn(session.run());

        SessionHandle {
            state: state_rx,
            phase: phase_rx,
            connection,
            commands,
            task,
        }
    }

    async fn run(mut self) {
        self.phase.send_replace(SessionPhase::Loading);
        let (snapshot, channel_url) = self.load_snapshot().await;
        tracing::info!(href = %self.href, name = ?snapshot.name, "controller snapshot loaded");
        self.state.send_replace(snapshot);

        let mut deltas = self.channel.open(&channel_url);

        // Deltas that arrive while history is loading wait in `pending` and
        // are applied after the seed, in arrival order.
        let mut pending = Vec::new();
        let history = {
            let fetch = fetch_history_with_retry(
                self.api.as_ref(),
                &self.href,
                &self.phase,
                self.retry_delay,
            );
            tokio::pin!(fetch);
            loop {
                tokio::select! {
                    history = &mut fetch => break history,
                    Some(delta) = deltas.recv() => pending.push(delta),
                }
            }
        };
        if let Err(e) = self.chart.seed(&history) {
            tracing::warn!(href = %self.href, error = %e, "discarding controller history");
        }
        if !pending.is_empty() {
            tracing::debug!(
                href = %self.href,
                count = pending.len(),
                "replaying deltas received during history load"
            );
        }
        for delta in pending {
            self.on_delta(delta);
        }
        self.phase.send_replace(SessionPhase::Live);

        while let Some(delta) = deltas.recv().await {
            self.on_delta(delta);
        }

        tracing::error!(href = %self.href, "live channel stopped; no further updates");
        self.phase.send_replace(SessionPhase::Error {
            message: "live channel gave up reconnecting".to_string(),
        });
    }

    async fn load_snapshot(&self) -> (ControllerState, String) {
        loop {
            match self.fetch_snapshot().await {
                Ok(loaded) => return loaded,
                Err(e) => {
                    tracing::warn!(
                        href = %self.href,
                        error = %format!("{e:#}"),
                        "snapshot fetch failed"
                    );
                    self.phase.send_replace(SessionPhase::Error {
                        message: format!("{e:#}"),
                    });
                    tokio::time::sleep(self.retry_delay).await;
                    self.phase.send_replace(SessionPhase::Loading);
                }
            }
        }
    }

    async fn fetch_snapshot(&self) -> anyhow::Result<(ControllerState, String)> {
        let snapshot = self.api.fetch_snapshot(&self.href).await?;
        let ws_url = snapshot
            .ws_url
            .as_deref()
            .context("controller snapshot has no wsUrl")?;
        let channel_url = self.api.channel_url(&self.href, ws_url)?;
        Ok((snapshot, channel_url))
    }

    fn on_delta(&mut self, received: ReceivedDelta) {
        let ReceivedDelta { received_at, delta } = received;
        // Receipt time, held non-decreasing against the controller's history.
        let mut timestamp_ms = received_at.timestamp_millis();
        if let Some(last) = self.chart.buffer().last_label() {
            timestamp_ms = timestamp_ms.max(last);
        }

        self.state.send_modify(|state| state.merge(&delta));
        let sample = Sample::from_state(&self.state.borrow(), timestamp_ms);
        if self.chart.append_point(&sample).gravity_created {
            tracing::info!(href = %self.href, "gravity readings started; adding gravity series");
        }
    }
}

async fn fetch_history_with_retry(
    api: &dyn ControllerApi,
    href: &str,
    phase: &watch::Sender<SessionPhase>,
    retry_delay: Duration,
) -> HistorySeries {
    loop {
        match api.fetch_history(href).await {
            Ok(history) => return history,
            Err(e) => {
                tracing::warn!(%href, error = %format!("{e:#}"), "history fetch failed");
                phase.send_replace(SessionPhase::Error {
                    message: format!("{e:#}"),
                });
                tokio::time::sleep(retry_delay).await;
                phase.send_replace(SessionPhase::Loading);
            }
        }
    }
}

/// View-side handle of a running session. Dropping it tears the session
/// down: the task is aborted, so nothing fetched afterwards is applied.
pub struct SessionHandle {
    state: watch::Receiver<ControllerState>,
    phase: watch::Receiver<SessionPhase>,
    connection: watch::Receiver<ConnectionState>,
    commands: CommandSender,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    pub fn connection(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Forward a command verbatim to the live channel.
    pub fn send_command(&self, command: &Command) -> Result<(), LiveChannelError> {
        match self.commands.send(command) {
            Ok(()) => {
                tracing::debug!(?command, "command sent");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(?command, error = %e, "command not sent");
                Err(e)
            }
        }
    }

    pub fn toggle_enabled(&self) -> Result<(), LiveChannelError> {
        let current = self.state.borrow().enabled.unwrap_or(false);
        self.send_command(&Command::enabled(!current))
    }

    pub fn toggle_automatic(&self) -> Result<(), LiveChannelError> {
        let current = self.state.borrow().automatic.unwrap_or(false);
        self.send_command(&Command::automatic(!current))
    }

    pub fn toggle_agitating(&self) -> Result<(), LiveChannelError> {
        let current = self.state.borrow().agitating.unwrap_or(false);
        self.send_command(&Command::agitating(!current))
    }

    pub fn set_setpoint(&self, setpoint: f64) -> Result<(), LiveChannelError> {
        self.send_command(&Command::setpoint(setpoint))
    }

    pub fn set_power(&self, power: f64) -> Result<(), LiveChannelError> {
        self.send_command(&Command::power(power))
    }

    /// Tear the session down; equivalent to dropping the handle.
    pub fn shutdown(self) {
        tracing::debug!("controller session shut down");
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chart::{PlotData, SeriesKind};
    use crate::application::testing::{FakeApi, FakeTransport, eventually};
    use crate::infrastructure::plot_surface::PlotSurface;
    use tokio::sync::Notify;

    const HREF: &str = "http://brewpi.local/controllers/ferm";

    fn fake_api() -> FakeApi {
        FakeApi {
            snapshot: ControllerState {
                name: Some("ferm".to_string()),
                enabled: Some(true),
                temperature: Some(20.12),
                power: Some(30.0),
                setpoint: Some(20.0),
                ws_url: Some("/controllers/ferm/ws".to_string()),
                ..ControllerState::default()
            },
            history: HistorySeries {
                label: vec![0.0, 60.0],
                temperature: vec![Some(19.0), Some(20.0)],
                power: vec![Some(25.0), Some(30.0)],
                setpoint: vec![Some(20.0), Some(20.0)],
                gravity: None,
            },
            ..FakeApi::default()
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            retry_delay: Duration::from_millis(10),
            ..SessionConfig::default()
        }
    }

    fn spawn(
        api: Arc<FakeApi>,
        transport: Arc<FakeTransport>,
        config: &SessionConfig,
    ) -> (SessionHandle, watch::Receiver<PlotData>) {
        let (surface, plot) = PlotSurface::new();
        let handle = ControllerSession::spawn(HREF, api, transport, Box::new(surface), config);
        (handle, plot)
    }

    fn series(plot: &watch::Receiver<PlotData>, kind: SeriesKind) -> Vec<Option<f64>> {
        plot.borrow().dataset(kind).map(|d| d.data.clone()).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_history_then_live_delta() {
        let transport = Arc::new(FakeTransport::default());
        let (handle, plot) = spawn(Arc::new(fake_api()), transport.clone(), &config());

        eventually(|| handle.phase() == SessionPhase::Live && transport.has_link()).await;
        assert_eq!(transport.urls(), vec!["http://brewpi.local/controllers/ferm/ws".to_string()]);
        assert_eq!(plot.borrow().labels, vec![0, 60_000]);
        assert_eq!(handle.state().temperature, Some(20.12));

        let link = transport.take_link();
        link.inbound.send(Ok(r#"{"temperature":20.5}"#.to_string())).await.unwrap();
        eventually(|| plot.borrow().labels.len() == 3).await;

        assert_eq!(series(&plot, SeriesKind::Temperature)[2], Some(20.5));
        assert_eq!(series(&plot, SeriesKind::Power)[2], Some(30.0));
        assert_eq!(series(&plot, SeriesKind::Setpoint)[2], Some(20.0));
        assert!(plot.borrow().labels[2] >= 60_000);

        let state = handle.state();
        assert_eq!(state.temperature, Some(20.5));
        assert_eq!(state.power, Some(30.0));
        assert_eq!(state.enabled, Some(true));
    }

    #[tokio::test]
    async fn test_live_label_clamped_to_future_history() {
        // Controller clock far ahead of ours: history ends in the year 2096.
        let api = FakeApi {
            history: HistorySeries {
                label: vec![3_999_999_940.0, 4_000_000_000.0],
                temperature: vec![Some(19.0), Some(20.0)],
                power: vec![Some(25.0), Some(30.0)],
                setpoint: vec![Some(20.0), Some(20.0)],
                gravity: None,
            },
            ..fake_api()
        };
        let transport = Arc::new(FakeTransport::default());
        let (handle, plot) = spawn(Arc::new(api), transport.clone(), &config());
        eventually(|| handle.phase() == SessionPhase::Live && transport.has_link()).await;

        let link = transport.take_link();
        link.inbound.send(Ok(r#"{"temperature":20.5}"#.to_string())).await.unwrap();
        link.inbound.send(Ok(r#"{"power":35}"#.to_string())).await.unwrap();
        eventually(|| plot.borrow().labels.len() == 4).await;

        let labels = plot.borrow().labels.clone();
        let last_history = 4_000_000_000_000;
        assert_eq!(labels, vec![3_999_999_940_000, last_history, last_history, last_history]);
        assert!(labels.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn test_deltas_during_history_load_are_replayed_in_order() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(FakeApi {
            history_gate: Some(gate.clone()),
            ..fake_api()
        });
        let transport = Arc::new(FakeTransport::default());
        let (handle, plot) = spawn(api, transport.clone(), &config());

        eventually(|| transport.has_link()).await;
        let link = transport.take_link();
        link.inbound.send(Ok(r#"{"temperature":21}"#.to_string())).await.unwrap();
        link.inbound.send(Ok(r#"{"power":40}"#.to_string())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.phase(), SessionPhase::Loading);
        assert!(plot.borrow().labels.is_empty());
        assert_eq!(handle.state().temperature, Some(20.12));

        gate.notify_one();
        eventually(|| handle.phase() == SessionPhase::Live).await;

        assert_eq!(plot.borrow().labels.len(), 4);
        assert_eq!(
            series(&plot, SeriesKind::Temperature),
            vec![Some(19.0), Some(20.0), Some(21.0), Some(21.0)]
        );
        assert_eq!(
            series(&plot, SeriesKind::Power),
            vec![Some(25.0), Some(30.0), Some(30.0), Some(40.0)]
        );
    }

    #[tokio::test]
    async fn test_first_gravity_delta_adds_series() {
        let transport = Arc::new(FakeTransport::default());
        let (handle, plot) = spawn(Arc::new(fake_api()), transport.clone(), &config());
        eventually(|| handle.phase() == SessionPhase::Live && transport.has_link()).await;
        assert!(plot.borrow().dataset(SeriesKind::Gravity).is_none());

        let link = transport.take_link();
        link.inbound.send(Ok(r#"{"gravity":1.045}"#.to_string())).await.unwrap();
        link.inbound.send(Ok(r#"{"temperature":20.3}"#.to_string())).await.unwrap();
        eventually(|| plot.borrow().labels.len() == 4).await;

        assert_eq!(
            series(&plot, SeriesKind::Gravity),
            vec![None, None, Some(1.045), Some(1.045)]
        );
        assert_eq!(handle.state().gravity, Some(1.045));
    }

    #[tokio::test]
    async fn test_malformed_messages_do_not_disturb_session() {
        let transport = Arc::new(FakeTransport::default());
        let (handle, plot) = spawn(Arc::new(fake_api()), transport.clone(), &config());
        eventually(|| handle.phase() == SessionPhase::Live && transport.has_link()).await;

        let link = transport.take_link();
        for text in ["{oops", "42", r#"{"power":"full"}"#, r#"{"power":50}"#] {
            link.inbound.send(Ok(text.to_string())).await.unwrap();
        }
        eventually(|| plot.borrow().labels.len() == 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(plot.borrow().labels.len(), 3);
        assert_eq!(handle.state().power, Some(50.0));
        assert_eq!(handle.phase(), SessionPhase::Live);
    }

    #[tokio::test]
    async fn test_send_command_only_while_open() {
        let transport = Arc::new(FakeTransport::default());
        let config = SessionConfig {
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_secs(60),
                ..ReconnectPolicy::default()
            },
            ..config()
        };
        let (handle, _plot) = spawn(Arc::new(fake_api()), transport.clone(), &config);
        eventually(|| handle.connection() == ConnectionState::Open && transport.has_link()).await;

        let mut link = transport.take_link();
        handle.send_command(&Command::power(55.0)).unwrap();
        assert_eq!(link.outbound.recv().await.unwrap(), r#"{"power":55}"#);
        assert!(link.outbound.try_recv().is_err());

        drop(link.inbound);
        eventually(|| matches!(handle.connection(), ConnectionState::Reconnecting { .. })).await;

        assert!(matches!(
            handle.send_command(&Command::power(55.0)),
            Err(LiveChannelError::NotOpen(ConnectionState::Reconnecting { attempt: 1 }))
        ));
        assert!(link.outbound.recv().await.is_none());
        assert_eq!(handle.phase(), SessionPhase::Live);
    }

    #[tokio::test]
    async fn test_toggles_send_negated_state() {
        let transport = Arc::new(FakeTransport::default());
        let (handle, _plot) = spawn(Arc::new(fake_api()), transport.clone(), &config());
        eventually(|| handle.connection() == ConnectionState::Open && transport.has_link()).await;
        let mut link = transport.take_link();

        handle.toggle_enabled().unwrap();
        handle.toggle_automatic().unwrap();
        handle.set_setpoint(21.5).unwrap();

        assert_eq!(link.outbound.recv().await.unwrap(), r#"{"enabled":false}"#);
        assert_eq!(link.outbound.recv().await.unwrap(), r#"{"automatic":true}"#);
        assert_eq!(link.outbound.recv().await.unwrap(), r#"{"setpoint":21.5}"#);
    }

    #[tokio::test]
    async fn test_snapshot_failure_enters_error_then_recovers() {
        let api = Arc::new(FakeApi {
            snapshot_failures: 1.into(),
            ..fake_api()
        });
        let transport = Arc::new(FakeTransport::default());
        let config = SessionConfig {
            retry_delay: Duration::from_millis(200),
            ..config()
        };
        let (handle, _plot) = spawn(api.clone(), transport.clone(), &config);

        eventually(|| matches!(handle.phase(), SessionPhase::Error { .. })).await;
        assert_eq!(transport.connects(), 0);

        eventually(|| handle.phase() == SessionPhase::Live).await;
        assert_eq!(api.snapshot_calls(), 2);
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_discards_late_snapshot() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(FakeApi {
            snapshot_gate: Some(gate.clone()),
            ..fake_api()
        });
        let transport = Arc::new(FakeTransport::default());
        let (handle, plot) = spawn(api.clone(), transport.clone(), &config());
        let state = handle.subscribe_state();

        eventually(|| api.snapshot_calls() == 1).await;
        handle.shutdown();
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(transport.connects(), 0);
        assert_eq!(state.borrow().name, None);
        assert!(plot.borrow().labels.is_empty());
    }
}

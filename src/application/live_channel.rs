// Live channel - reconnecting full-duplex link to one controller
use crate::application::transport::{Link, Transport};
use crate::domain::controller::{Command, StateDelta};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const DELTA_QUEUE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Failed,
}

/// How a closed channel is re-opened.
///
/// Attempt `n` (1-based, reset after every successful open) waits
/// `initial_delay * multiplier^(n-1)`, plus up to `jitter` of that delay at
/// random, capped at `max_delay`. `max_attempts` bounds the consecutive
/// attempts before the channel gives up with [`ConnectionState::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if secs.is_finite() {
            Duration::from_secs_f64(secs.clamp(0.0, max))
        } else {
            self.max_delay
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter > 0.0 && self.jitter.is_finite() && !base.is_zero() {
            let spread = rand::rng().random_range(0.0..=self.jitter);
            // Jitter never pushes the wait past `max_delay`, however large.
            Duration::try_from_secs_f64(base.as_secs_f64() * spread)
                .ok()
                .and_then(|extra| base.checked_add(extra))
                .map_or(self.max_delay, |delay| delay.min(self.max_delay))
        } else {
            base
        }
    }
}

#[derive(Debug, Error)]
pub enum LiveChannelError {
    #[error("live channel is not open ({0:?}); command dropped")]
    NotOpen(ConnectionState),
    #[error("command has no fields to send")]
    EmptyCommand,
    #[error("outbound queue is full; command dropped")]
    QueueFull,
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A decoded delta stamped with the time it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedDelta {
    pub received_at: DateTime<Utc>,
    pub delta: StateDelta,
}

#[derive(Debug, Clone)]
struct LinkStatus {
    state: ConnectionState,
    outbound: Option<mpsc::Sender<String>>,
}

impl LinkStatus {
    fn new(state: ConnectionState) -> Self {
        Self {
            state,
            outbound: None,
        }
    }
}

/// Cloneable command side of a [`LiveChannel`].
#[derive(Debug, Clone)]
pub struct CommandSender {
    status: watch::Receiver<LinkStatus>,
}

impl CommandSender {
    /// Transmit a command if the channel is open. Nothing is queued while the
    /// channel is down: the command is dropped and `NotOpen` returned.
    pub fn send(&self, command: &Command) -> Result<(), LiveChannelError> {
        if command.is_empty() {
            return Err(LiveChannelError::EmptyCommand);
        }
        let outbound = {
            let status = self.status.borrow();
            match (&status.state, &status.outbound) {
                (ConnectionState::Open, Some(outbound)) => outbound.clone(),
                (state, _) => return Err(LiveChannelError::NotOpen(*state)),
            }
        };

        let text = command.to_json()?;
        outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LiveChannelError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                LiveChannelError::NotOpen(ConnectionState::Reconnecting { attempt: 1 })
            }
        })
    }
}

pub struct LiveChannel {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    status: Arc<watch::Sender<LinkStatus>>,
    states: Arc<watch::Sender<ConnectionState>>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(LinkStatus::new(ConnectionState::Idle));
        let (states, _) = watch::channel(ConnectionState::Idle);
        Self {
            transport,
            policy,
            status: Arc::new(status),
            states: Arc::new(states),
            task: None,
        }
    }

    /// Start (or restart) the channel against `url`. Decoded deltas arrive on
    /// the returned receiver in the order the transport received them.
    pub fn open(&mut self, url: &str) -> mpsc::Receiver<ReceivedDelta> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let (deltas_tx, deltas_rx) = mpsc::channel(DELTA_QUEUE);
        let publisher = StatePublisher {
            status: self.status.clone(),
            states: self.states.clone(),
        };
        self.task = Some(tokio::spawn(run_channel(
            self.transport.clone(),
            self.policy.clone(),
            publisher,
            url.to_string(),
            deltas_tx,
        )));
        deltas_rx
    }

    pub fn send(&self, command: &Command) -> Result<(), LiveChannelError> {
        self.sender().send(command)
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            status: self.status.subscribe(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.states.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.states.subscribe()
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.status.send_replace(LinkStatus::new(ConnectionState::Idle));
        self.states.send_replace(ConnectionState::Idle);
    }
}

struct StatePublisher {
    status: Arc<watch::Sender<LinkStatus>>,
    states: Arc<watch::Sender<ConnectionState>>,
}

impl StatePublisher {
    fn publish(&self, state: ConnectionState, outbound: Option<mpsc::Sender<String>>) {
        self.status.send_replace(LinkStatus { state, outbound });
        self.states.send_replace(state);
    }
}

async fn run_channel(
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    publisher: StatePublisher,
    url: String,
    deltas: mpsc::Sender<ReceivedDelta>,
) {
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            if !policy.allows(attempt) {
                tracing::error!(
                    %url,
                    attempts = attempt - 1,
                    "live channel giving up after repeated failures"
                );
                publisher.publish(ConnectionState::Failed, None);
                return;
            }
            publisher.publish(ConnectionState::Reconnecting { attempt }, None);
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                let delay_ms = delay.as_millis() as u64;
                tracing::debug!(%url, attempt, delay_ms, "waiting before reconnect");
                tokio::time::sleep(delay).await;
            }
        }

        publisher.publish(ConnectionState::Connecting, None);
        let Link {
            outbound,
            mut inbound,
        } = match transport.connect(&url).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(%url, attempt, error = %e, "live channel connect failed");
                attempt += 1;
                continue;
            }
        };

        publisher.publish(ConnectionState::Open, Some(outbound));
        tracing::info!(%url, "live channel open");

        loop {
            match inbound.recv().await {
                Some(Ok(text)) => match StateDelta::decode(&text) {
                    Ok(delta) => {
                        let received = ReceivedDelta {
                            received_at: Utc::now(),
                            delta,
                        };
                        if deltas.send(received).await.is_err() {
                            tracing::debug!(%url, "delta receiver dropped; stopping live channel");
                            publisher.publish(ConnectionState::Idle, None);
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%url, error = %e, "dropping malformed live message");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(%url, error = %e, "live channel error");
                    break;
                }
                None => {
                    tracing::info!(%url, "live channel closed");
                    break;
                }
            }
        }

        attempt = 1;
    }
}

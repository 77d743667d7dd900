use crate::application::live_channel::ReconnectPolicy;
use crate::application::session::SessionConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub controllers: ControllerSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub chart: ChartStyle,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControllerSettings {
    pub base_url: String,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Reconnect policy for live channels. The defaults reconnect immediately and
/// forever, which suits a controller on the local network.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
            max_attempts: policy.max_attempts,
        }
    }
}

impl ReconnectSettings {
    /// Jitter is a fraction of the delay and is held to `0.0..=1.0`; the
    /// multiplier is at least 1.
    pub fn to_policy(&self) -> ReconnectPolicy {
        let jitter = if self.jitter.is_finite() { self.jitter.clamp(0.0, 1.0) } else { 0.0 };
        let multiplier = if self.multiplier.is_finite() { self.multiplier.max(1.0) } else { 1.0 };
        if jitter != self.jitter || multiplier != self.multiplier {
            tracing::warn!(
                jitter = self.jitter,
                multiplier = self.multiplier,
                "reconnect settings out of range; clamped"
            );
        }
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier,
            jitter,
            max_attempts: self.max_attempts,
        }
    }
}

/// Chart palette handed to every chart adapter.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChartStyle {
    pub temperature_color: String,
    pub power_color: String,
    pub power_fill: String,
    pub setpoint_color: String,
    pub gravity_color: String,
    pub gravity_border: String,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            temperature_color: "rgb(255, 99, 132)".to_string(),
            power_color: "rgb(75, 192, 192)".to_string(),
            power_fill: "rgba(75, 192, 192, 0.3)".to_string(),
            setpoint_color: "rgb(54, 162, 235)".to_string(),
            gravity_color: "rgb(255, 205, 86)".to_string(),
            gravity_border: "rgb(255, 255, 255)".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retry_delay: Duration::from_millis(self.session.retry_delay_ms),
            reconnect: self.reconnect.to_policy(),
            chart: self.chart.clone(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.controllers.refresh_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.controllers.request_timeout_secs)
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_refresh_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    5000
}

/// Loads `config/dashboard.toml`, overridden by `BREWDASH_*` variables
/// (`BREWDASH_CONTROLLERS__BASE_URL=http://brewpi:8080`).
pub fn load_dashboard_config() -> anyhow::Result<DashboardConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(environment())
        .build()?;

    Ok(settings.try_deserialize()?)
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("BREWDASH")
        .prefix_separator("_")
        .separator("__")
}

// Time series domain model - samples, controller history and the chart buffer
use crate::domain::controller::ControllerState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One timestamped set of readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub temperature: Option<f64>,
    pub power: Option<f64>,
    pub setpoint: Option<f64>,
    pub gravity: Option<f64>,
}

impl Sample {
    pub fn from_state(state: &ControllerState, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            temperature: state.temperature,
            power: state.power,
            setpoint: state.setpoint,
            gravity: state.gravity,
        }
    }
}

/// Parallel arrays served by `{href}/datahistory`; labels are epoch seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySeries {
    #[serde(default)]
    pub label: Vec<f64>,
    #[serde(default)]
    pub temperature: Vec<Option<f64>>,
    #[serde(default)]
    pub power: Vec<Option<f64>>,
    #[serde(default)]
    pub setpoint: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gravity: Option<Vec<Option<f64>>>,
}

pub fn epoch_seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).floor() as i64
}

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("history can only be loaded once, into an empty buffer")]
    AlreadyLoaded,
    #[error("history series {field} has {actual} values but there are {expected} labels")]
    Misaligned {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub gravity_created: bool,
}

/// Append-only chart data: `labels[i]` is the timestamp of sample `i` in
/// every series. The gravity series is back-filled with gaps when it first
/// appears so that it stays index-aligned with the labels.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesBuffer {
    labels: Vec<i64>,
    temperature: Vec<Option<f64>>,
    power: Vec<Option<f64>>,
    setpoint: Vec<Option<f64>>,
    gravity: Option<Vec<Option<f64>>>,
    loaded: bool,
}

impl TimeSeriesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, history: &HistorySeries) -> Result<(), SeriesError> {
        if self.loaded || !self.labels.is_empty() {
            return Err(SeriesError::AlreadyLoaded);
        }

        let expected = history.label.len();
        let mut columns = vec![
            ("temperature", history.temperature.len()),
            ("power", history.power.len()),
            ("setpoint", history.setpoint.len()),
        ];
        if let Some(gravity) = &history.gravity {
            columns.push(("gravity", gravity.len()));
        }
        if let Some((field, actual)) = columns.into_iter().find(|(_, len)| *len != expected) {
            return Err(SeriesError::Misaligned {
                field,
                expected,
                actual,
            });
        }

        self.labels = history.label.iter().copied().map(epoch_seconds_to_ms).collect();
        self.temperature = history.temperature.clone();
        self.power = history.power.clone();
        self.setpoint = history.setpoint.clone();
        self.gravity = history.gravity.clone();
        self.loaded = true;
        Ok(())
    }

    pub fn append(&mut self, sample: &Sample) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();
        if sample.gravity.is_some() && self.gravity.is_none() {
            self.gravity = Some(vec![None; self.labels.len()]);
            outcome.gravity_created = true;
        }

        self.labels.push(sample.timestamp_ms);
        self.temperature.push(sample.temperature);
        self.power.push(sample.power);
        self.setpoint.push(sample.setpoint);
        if let Some(gravity) = &mut self.gravity {
            gravity.push(sample.gravity);
        }
        outcome
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn last_label(&self) -> Option<i64> {
        self.labels.last().copied()
    }

    pub fn temperature(&self) -> &[Option<f64>] {
        &self.temperature
    }

    pub fn power(&self) -> &[Option<f64>] {
        &self.power
    }

    pub fn setpoint(&self) -> &[Option<f64>] {
        &self.setpoint
    }

    pub fn gravity(&self) -> Option<&[Option<f64>]> {
        self.gravity.as_deref()
    }

    pub fn has_gravity(&self) -> bool {
        self.gravity.is_some()
    }
}

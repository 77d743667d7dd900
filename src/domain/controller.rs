// Controller domain model - live state, inbound deltas and outbound commands
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Current readings and modes of one brewing controller.
///
/// Every field is optional: a snapshot may omit readings the controller does
/// not have (no agitator, no hydrometer) and deltas only carry what changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agitating: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gravity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
}

impl ControllerState {
    /// Shallow merge: keys present in the delta overwrite, absent keys keep
    /// their prior value.
    pub fn merge(&mut self, delta: &StateDelta) {
        overwrite(&mut self.name, &delta.name);
        overwrite(&mut self.enabled, &delta.enabled);
        overwrite(&mut self.automatic, &delta.automatic);
        overwrite(&mut self.agitating, &delta.agitating);
        overwrite(&mut self.temperature, &delta.temperature);
        overwrite(&mut self.power, &delta.power);
        overwrite(&mut self.setpoint, &delta.setpoint);
        overwrite(&mut self.gravity, &delta.gravity);
        overwrite(&mut self.ws_url, &delta.ws_url);
    }
}

fn overwrite<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if let Some(value) = value {
        *slot = Some(value.clone());
    }
}

/// Partial state update received over the live channel.
///
/// Unknown keys are ignored and `null` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateDelta {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub automatic: Option<bool>,
    pub agitating: Option<bool>,
    pub temperature: Option<f64>,
    pub power: Option<f64>,
    pub setpoint: Option<f64>,
    pub gravity: Option<f64>,
    pub ws_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("delta is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("delta must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("delta field has an unexpected type: {0}")]
    FieldType(#[source] serde_json::Error),
}

impl StateDelta {
    pub fn decode(text: &str) -> Result<Self, DeltaError> {
        let value: Value = serde_json::from_str(text).map_err(DeltaError::InvalidJson)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DeltaError> {
        let kind = match &value {
            Value::Object(_) => None,
            Value::Null => Some("null"),
            Value::Bool(_) => Some("a boolean"),
            Value::Number(_) => Some("a number"),
            Value::String(_) => Some("a string"),
            Value::Array(_) => Some("an array"),
        };
        if let Some(kind) = kind {
            return Err(DeltaError::NotAnObject(kind));
        }
        serde_json::from_value(value).map_err(DeltaError::FieldType)
    }
}

/// Operator command sent to a controller. Only the set fields go on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agitating: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact_number"
    )]
    pub setpoint: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact_number"
    )]
    pub power: Option<f64>,
}

impl Command {
    pub fn enabled(value: bool) -> Self {
        Self {
            enabled: Some(value),
            ..Self::default()
        }
    }

    pub fn automatic(value: bool) -> Self {
        Self {
            automatic: Some(value),
            ..Self::default()
        }
    }

    pub fn agitating(value: bool) -> Self {
        Self {
            agitating: Some(value),
            ..Self::default()
        }
    }

    pub fn setpoint(value: f64) -> Self {
        Self {
            setpoint: Some(value),
            ..Self::default()
        }
    }

    /// Power is a duty cycle in percent, clamped to 0..=100.
    pub fn power(value: f64) -> Self {
        Self {
            power: Some(value.clamp(0.0, 100.0)),
            ..Self::default()
        }
    }

    /// Apply the same bounds as the constructors to a command decoded from
    /// outside.
    pub fn clamped(mut self) -> Self {
        self.power = self.power.map(|p| p.clamp(0.0, 100.0));
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// Integral values go out as `55`, not `55.0`.
fn compact_number<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    match value {
        Some(v) if v.fract() == 0.0 && v.abs() < MAX_EXACT => serializer.serialize_i64(*v as i64),
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_none(),
    }
}

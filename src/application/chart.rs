// Chart adapter - keeps a rendering surface in step with the time series buffer
use crate::domain::series::{AppendOutcome, HistorySeries, Sample, SeriesError, TimeSeriesBuffer};
use crate::infrastructure::config::ChartStyle;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Temperature,
    Power,
    Setpoint,
    Gravity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisId {
    Time,
    Temperature,
    Power,
    Gravity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisPosition {
    Bottom,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisConfig {
    pub id: AxisId,
    pub position: AxisPosition,
    pub begin_at_zero: bool,
    pub suggested_min: Option<f64>,
    pub suggested_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStyle {
    pub kind: SeriesKind,
    pub label: String,
    pub axis: AxisId,
    pub fill: bool,
    pub background_color: String,
    pub border_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    #[serde(flatten)]
    pub style: SeriesStyle,
    pub data: Vec<Option<f64>>,
}

/// What a view needs to draw the chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotData {
    pub revision: u64,
    pub axes: Vec<AxisConfig>,
    pub labels: Vec<i64>,
    pub datasets: Vec<Dataset>,
}

impl PlotData {
    pub fn dataset(&self, kind: SeriesKind) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.style.kind == kind)
    }
}

/// Rendering surface driven by a [`ChartAdapter`]. The surface keeps its own
/// per-series buffers; the adapter pushes every change to it synchronously.
pub trait ChartSurface: Send + Sync {
    fn configure(&mut self, axes: &[AxisConfig]);
    fn add_axis(&mut self, axis: &AxisConfig);
    fn add_series(&mut self, series: &SeriesStyle);
    fn load(&mut self, labels: &[i64], series: &[(SeriesKind, &[Option<f64>])]);
    fn push_point(&mut self, label: i64, values: &[(SeriesKind, Option<f64>)]);
    fn render(&mut self);
}

/// Creates one surface per controller, paired with the receiver views read
/// the published chart from.
pub trait SurfaceFactory: Send + Sync {
    fn create(&self) -> (Box<dyn ChartSurface>, watch::Receiver<PlotData>);
}

/// The axes every chart starts with: time along the bottom with the full
/// history visible, temperature on the left, power on the right.
pub fn axes() -> Vec<AxisConfig> {
    vec![
        AxisConfig {
            id: AxisId::Time,
            position: AxisPosition::Bottom,
            begin_at_zero: false,
            suggested_min: None,
            suggested_max: None,
        },
        AxisConfig {
            id: AxisId::Temperature,
            position: AxisPosition::Left,
            begin_at_zero: false,
            suggested_min: None,
            suggested_max: None,
        },
        AxisConfig {
            id: AxisId::Power,
            position: AxisPosition::Right,
            begin_at_zero: true,
            suggested_min: Some(0.0),
            suggested_max: Some(100.0),
        },
    ]
}

/// Added on the right once the first gravity reading shows up.
pub fn gravity_axis() -> AxisConfig {
    AxisConfig {
        id: AxisId::Gravity,
        position: AxisPosition::Right,
        begin_at_zero: false,
        suggested_min: Some(1.0),
        suggested_max: Some(1.120),
    }
}

pub fn series_style(style: &ChartStyle, kind: SeriesKind) -> SeriesStyle {
    let (label, axis, fill, background, border) = match kind {
        SeriesKind::Temperature => (
            "Temperature",
            AxisId::Temperature,
            false,
            &style.temperature_color,
            &style.temperature_color,
        ),
        SeriesKind::Power => ("Power", AxisId::Power, true, &style.power_fill, &style.power_color),
        SeriesKind::Setpoint => (
            "Setpoint",
            AxisId::Temperature,
            false,
            &style.setpoint_color,
            &style.setpoint_color,
        ),
        SeriesKind::Gravity => (
            "Gravity",
            AxisId::Gravity,
            true,
            &style.gravity_color,
            &style.gravity_border,
        ),
    };
    SeriesStyle {
        kind,
        label: label.to_string(),
        axis,
        fill,
        background_color: background.clone(),
        border_color: border.clone(),
    }
}

pub struct ChartAdapter {
    surface: Box<dyn ChartSurface>,
    buffer: TimeSeriesBuffer,
    style: ChartStyle,
}

impl ChartAdapter {
    pub fn new(mut surface: Box<dyn ChartSurface>, style: &ChartStyle) -> Self {
        surface.configure(&axes());
        for kind in [SeriesKind::Temperature, SeriesKind::Power, SeriesKind::Setpoint] {
            surface.add_series(&series_style(style, kind));
        }
        Self {
            surface,
            buffer: TimeSeriesBuffer::new(),
            style: style.clone(),
        }
    }

    pub fn buffer(&self) -> &TimeSeriesBuffer {
        &self.buffer
    }

    /// Draw the historical load. Only the first call succeeds.
    pub fn seed(&mut self, history: &HistorySeries) -> Result<(), SeriesError> {
        self.buffer.load(history)?;
        if self.buffer.has_gravity() {
            self.add_gravity();
        }

        let mut series = vec![
            (SeriesKind::Temperature, self.buffer.temperature()),
            (SeriesKind::Power, self.buffer.power()),
            (SeriesKind::Setpoint, self.buffer.setpoint()),
        ];
        if let Some(gravity) = self.buffer.gravity() {
            series.push((SeriesKind::Gravity, gravity));
        }
        self.surface.load(self.buffer.labels(), &series);
        self.surface.render();
        Ok(())
    }

    /// Append one sample and redraw before returning. A newly introduced
    /// gravity series is announced to the surface before its first point.
    pub fn append_point(&mut self, sample: &Sample) -> AppendOutcome {
        let outcome = self.buffer.append(sample);
        if outcome.gravity_created {
            self.add_gravity();
        }

        let mut values = vec![
            (SeriesKind::Temperature, sample.temperature),
            (SeriesKind::Power, sample.power),
            (SeriesKind::Setpoint, sample.setpoint),
        ];
        if self.buffer.has_gravity() {
            values.push((SeriesKind::Gravity, sample.gravity));
        }
        self.surface.push_point(sample.timestamp_ms, &values);
        self.surface.render();
        outcome
    }

    fn add_gravity(&mut self) {
        self.surface.add_axis(&gravity_axis());
        self.surface.add_series(&series_style(&self.style, SeriesKind::Gravity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{RecordingSurface, SurfaceEvent};

    fn history() -> HistorySeries {
        HistorySeries {
            label: vec![0.0, 60.0],
            temperature: vec![Some(19.0), Some(20.0)],
            power: vec![Some(25.0), Some(30.0)],
            setpoint: vec![Some(20.0), Some(20.0)],
            gravity: None,
        }
    }

    fn sample(timestamp_ms: i64, gravity: Option<f64>) -> Sample {
        Sample {
            timestamp_ms,
            temperature: Some(20.5),
            power: Some(30.0),
            setpoint: Some(20.0),
            gravity,
        }
    }

    #[test]
    fn test_initialize_configures_axes_and_base_series() {
        let (surface, events) = RecordingSurface::new();
        let _chart = ChartAdapter::new(Box::new(surface), &ChartStyle::default());

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                SurfaceEvent::Configure(3),
                SurfaceEvent::AddSeries(SeriesKind::Temperature),
                SurfaceEvent::AddSeries(SeriesKind::Power),
                SurfaceEvent::AddSeries(SeriesKind::Setpoint),
            ]
        );
    }

    #[test]
    fn test_gravity_series_added_before_first_gravity_point() {
        let (surface, events) = RecordingSurface::new();
        let mut chart = ChartAdapter::new(Box::new(surface), &ChartStyle::default());
        chart.seed(&history()).unwrap();
        chart.append_point(&sample(61_000, None));
        let outcome = chart.append_point(&sample(62_000, Some(1.045)));
        assert!(outcome.gravity_created);

        let events = events.lock().unwrap();
        let added = events
            .iter()
            .position(|e| *e == SurfaceEvent::AddSeries(SeriesKind::Gravity))
            .unwrap();
        let first_gravity_point = events
            .iter()
            .position(|e| match e {
                SurfaceEvent::Push { kinds, .. } => kinds.contains(&SeriesKind::Gravity),
                _ => false,
            })
            .unwrap();
        let axis_added = events
            .iter()
            .position(|e| *e == SurfaceEvent::AddAxis(AxisId::Gravity))
            .unwrap();
        assert!(!events[..axis_added].iter().any(|e| matches!(e, SurfaceEvent::AddAxis(_))));
        assert!(axis_added < added);
        assert!(added < first_gravity_point);
        assert_eq!(events.last(), Some(&SurfaceEvent::Render));
    }

    #[test]
    fn test_seed_with_gravity_history_adds_series_first() {
        let (surface, events) = RecordingSurface::new();
        let mut chart = ChartAdapter::new(Box::new(surface), &ChartStyle::default());
        let mut history = history();
        history.gravity = Some(vec![Some(1.050), Some(1.048)]);
        chart.seed(&history).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            events[4..],
            [
                SurfaceEvent::AddAxis(AxisId::Gravity),
                SurfaceEvent::AddSeries(SeriesKind::Gravity),
                SurfaceEvent::Load(2),
                SurfaceEvent::Render,
            ]
        );
    }

    #[test]
    fn test_series_colors_come_from_style() {
        let style = ChartStyle {
            temperature_color: "red".to_string(),
            ..ChartStyle::default()
        };
        let temperature = series_style(&style, SeriesKind::Temperature);
        assert_eq!(temperature.border_color, "red");
        assert_eq!(temperature.axis, AxisId::Temperature);

        let setpoint = series_style(&style, SeriesKind::Setpoint);
        assert_eq!(setpoint.axis, AxisId::Temperature);
        assert!(series_style(&style, SeriesKind::Power).fill);
    }
}

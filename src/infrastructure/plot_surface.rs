// Plot surface - chart datasets published for the HTTP view layer
use crate::application::chart::{
    AxisConfig, ChartSurface, Dataset, PlotData, SeriesKind, SeriesStyle, SurfaceFactory,
};
use tokio::sync::watch;

/// In-memory surface that publishes its datasets through a watch channel.
/// Mutations are silent; `render` bumps the revision and wakes readers.
pub struct PlotSurface {
    published: watch::Sender<PlotData>,
}

impl PlotSurface {
    pub fn new() -> (Self, watch::Receiver<PlotData>) {
        let (published, plot) = watch::channel(PlotData::default());
        (Self { published }, plot)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlotSurfaceFactory;

impl SurfaceFactory for PlotSurfaceFactory {
    fn create(&self) -> (Box<dyn ChartSurface>, watch::Receiver<PlotData>) {
        let (surface, plot) = PlotSurface::new();
        (Box::new(surface), plot)
    }
}

impl ChartSurface for PlotSurface {
    fn configure(&mut self, axes: &[AxisConfig]) {
        self.published.send_if_modified(|plot| {
            plot.axes = axes.to_vec();
            false
        });
    }

    fn add_axis(&mut self, axis: &AxisConfig) {
        self.published.send_if_modified(|plot| {
            if !plot.axes.iter().any(|a| a.id == axis.id) {
                plot.axes.push(axis.clone());
            }
            false
        });
    }

    fn add_series(&mut self, series: &SeriesStyle) {
        self.published.send_if_modified(|plot| {
            if plot.dataset(series.kind).is_none() {
                plot.datasets.push(Dataset {
                    style: series.clone(),
                    data: vec![None; plot.labels.len()],
                });
            }
            false
        });
    }

    fn load(&mut self, labels: &[i64], series: &[(SeriesKind, &[Option<f64>])]) {
        self.published.send_if_modified(|plot| {
            plot.labels = labels.to_vec();
            for dataset in &mut plot.datasets {
                dataset.data = series
                    .iter()
                    .find(|(kind, _)| *kind == dataset.style.kind)
                    .map(|(_, data)| data.to_vec())
                    .unwrap_or_else(|| vec![None; labels.len()]);
            }
            false
        });
    }

    fn push_point(&mut self, label: i64, values: &[(SeriesKind, Option<f64>)]) {
        self.published.send_if_modified(|plot| {
            plot.labels.push(label);
            for dataset in &mut plot.datasets {
                let value = values
                    .iter()
                    .find(|(kind, _)| *kind == dataset.style.kind)
                    .and_then(|(_, value)| *value);
                dataset.data.push(value);
            }
            false
        });
    }

    fn render(&mut self) {
        self.published.send_modify(|plot| plot.revision += 1);
    }
}

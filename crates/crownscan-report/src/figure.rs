//! Plot kinds and the lazily initialized figure they draw into.
//!
//! A [`Figure`] starts [`Empty`](FigureState::Empty); the first plotted
//! tensor lays out the grid ([`Initialized`](FigureState::Initialized));
//! [`Figure::render`] emits the SVG document once and moves it to
//! [`Saved`](FigureState::Saved). A figure that never received data
//! renders nothing, so callers can create one per plot kind up front and
//! only write files for kinds that were actually drawn.

use ndarray::ArrayView2;

use crownscan_pipeline::FeatureTensor;

use crate::colormap::{Rgb, categorical};
use crate::histogram::Histogram;
use crate::svg::{Canvas, Cell, Layer};

/// Bins per histogram-grid cell.
pub const HISTOGRAM_BINS: usize = 10;

/// Bins per stacked-histogram layer.
pub const STACKED_BINS: usize = 100;

/// Fill opacity of stacked-histogram layers.
pub const STACKED_ALPHA: f32 = 0.3;

/// The three report plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotKind {
    /// Per region: every feature map drawn as a colour-mapped image.
    ImageGrid,
    /// Per region: a 10-bin histogram of every feature map.
    HistogramGrid,
    /// Per set: density histograms of every region overlaid per cell.
    StackedHistogram,
}

impl PlotKind {
    /// All kinds, in the order a report visits them.
    pub const ALL: [Self; 3] = [Self::HistogramGrid, Self::ImageGrid, Self::StackedHistogram];

    /// Document size in pixels, `(width, height)`.
    #[must_use]
    pub const fn size(self) -> (u32, u32) {
        match self {
            Self::ImageGrid => (2000, 2000),
            Self::HistogramGrid => (1500, 1000),
            Self::StackedHistogram => (2500, 2000),
        }
    }

    /// Human-readable name, used as the document title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::ImageGrid => "feature maps",
            Self::HistogramGrid => "feature histograms",
            Self::StackedHistogram => "stacked feature histograms",
        }
    }

    /// Share of the width reserved on the right for the legend.
    #[must_use]
    pub const fn legend_ratio(self) -> f32 {
        match self {
            Self::StackedHistogram => 0.12,
            Self::ImageGrid | Self::HistogramGrid => 0.0,
        }
    }

    /// Whether one plot covers a whole set rather than one region.
    #[must_use]
    pub const fn is_per_set(self) -> bool {
        matches!(self, Self::StackedHistogram)
    }

    /// File name of the plot.
    ///
    /// Per-region plots are named after the region's artifact stem and
    /// sit next to it; the per-set plot has a fixed name inside the set
    /// directory.
    ///
    /// ```
    /// use crownscan_report::PlotKind;
    ///
    /// assert_eq!(PlotKind::ImageGrid.file_name("Ficus_3"), "Ficus_3_image.svg");
    /// assert_eq!(PlotKind::StackedHistogram.file_name("Ficus_3"), "stacked_hist.svg");
    /// ```
    #[must_use]
    pub fn file_name(self, stem: &str) -> String {
        match self {
            Self::ImageGrid => format!("{stem}_image.svg"),
            Self::HistogramGrid => format!("{stem}_hist.svg"),
            Self::StackedHistogram => "stacked_hist.svg".to_owned(),
        }
    }
}

/// Row and column labels of a plot grid.
///
/// Rows are tensor planes (channels or channel pairs), columns are
/// features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLabels {
    /// One label per tensor plane, drawn left of column 0.
    pub rows: Vec<String>,
    /// One title per feature, drawn above row 0.
    pub columns: Vec<String>,
}

impl GridLabels {
    /// Build labels from row and column names.
    #[must_use]
    pub const fn new(rows: Vec<String>, columns: Vec<String>) -> Self {
        Self { rows, columns }
    }
}

/// Errors raised while drawing.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The tensor does not have one plane per row and one feature per
    /// column.
    #[error(
        "tensor has {planes} planes x {features} features, expected {rows} x {columns}"
    )]
    ShapeMismatch {
        /// Planes in the tensor.
        planes: usize,
        /// Features in the tensor.
        features: usize,
        /// Configured row labels.
        rows: usize,
        /// Configured column labels.
        columns: usize,
    },

    /// The figure was already rendered.
    #[error("figure was already saved")]
    AlreadySaved,

    /// A feature map could not be rasterized.
    #[error("failed to encode feature map: {0}")]
    Encode(String),
}

/// Lifecycle of a [`Figure`].
#[derive(Debug)]
pub enum FigureState {
    /// Nothing drawn yet.
    Empty,
    /// Grid laid out and holding data.
    Initialized(Box<Canvas>),
    /// Rendered; further drawing is rejected.
    Saved,
}

/// One plot being assembled.
#[derive(Debug)]
pub struct Figure {
    kind: PlotKind,
    labels: GridLabels,
    state: FigureState,
}

impl Figure {
    /// An empty figure of `kind`.
    #[must_use]
    pub const fn new(kind: PlotKind, labels: GridLabels) -> Self {
        Self {
            kind,
            labels,
            state: FigureState::Empty,
        }
    }

    /// The plot kind.
    #[must_use]
    pub const fn kind(&self) -> PlotKind {
        self.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &FigureState {
        &self.state
    }

    /// Draw every plane and feature of `tensor`.
    ///
    /// `tree_name` labels the layer in the stacked-histogram legend; it is
    /// recorded once per tensor, from the first cell.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ShapeMismatch`] if the tensor does not match
    /// the grid labels (the figure is left unchanged),
    /// [`RenderError::AlreadySaved`] after [`render`](Self::render), or
    /// [`RenderError::Encode`] if a feature map cannot be rasterized.
    pub fn plot_tensor(&mut self, tensor: &FeatureTensor, tree_name: &str) -> Result<(), RenderError> {
        let (rows, columns) = (self.labels.rows.len(), self.labels.columns.len());
        if tensor.planes() != rows || tensor.features() != columns {
            return Err(RenderError::ShapeMismatch {
                planes: tensor.planes(),
                features: tensor.features(),
                rows,
                columns,
            });
        }
        let data = tensor.to_f32();
        for row in 0..rows {
            for column in 0..columns {
                let map = data.slice(ndarray::s![.., .., row, column]);
                self.plot_cell(map, row, column, tree_name)?;
            }
        }
        Ok(())
    }

    /// Draw one feature map into cell `(row, column)`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::AlreadySaved`] after
    /// [`render`](Self::render) or [`RenderError::Encode`] if the map
    /// cannot be rasterized.
    pub fn plot_cell(
        &mut self,
        map: ArrayView2<'_, f32>,
        row: usize,
        column: usize,
        tree_name: &str,
    ) -> Result<(), RenderError> {
        let kind = self.kind;
        let canvas = self.canvas()?;
        match kind {
            PlotKind::ImageGrid => {
                let image = crate::svg::encode_feature_map(map)?;
                canvas.set(row, column, Cell::Image(image));
            }
            PlotKind::HistogramGrid => {
                if let Some(histogram) = Histogram::from_values(map.iter().copied(), HISTOGRAM_BINS, false) {
                    canvas.set(
                        row,
                        column,
                        Cell::Bars(vec![Layer {
                            histogram,
                            color: categorical(0),
                            alpha: 1.0,
                        }]),
                    );
                }
            }
            PlotKind::StackedHistogram => {
                if row == 0 && column == 0 {
                    canvas.begin_layer(tree_name);
                }
                let color = canvas.layer_color();
                if let Some(histogram) = Histogram::from_values(map.iter().copied(), STACKED_BINS, true) {
                    canvas.push_layer(
                        row,
                        column,
                        Layer {
                            histogram,
                            color,
                            alpha: STACKED_ALPHA,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Emit the SVG document and mark the figure saved.
    ///
    /// Returns `None` if nothing was drawn or the figure was already
    /// rendered.
    pub fn render(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, FigureState::Saved) {
            FigureState::Initialized(canvas) => Some(canvas.to_document(&self.labels)),
            FigureState::Empty => {
                self.state = FigureState::Empty;
                None
            }
            FigureState::Saved => None,
        }
    }

    fn canvas(&mut self) -> Result<&mut Canvas, RenderError> {
        if matches!(self.state, FigureState::Empty) {
            log::debug!("initializing {:?} figure", self.kind);
            self.state = FigureState::Initialized(Box::new(Canvas::new(
                self.kind,
                self.labels.rows.len(),
                self.labels.columns.len(),
            )));
        }
        match &mut self.state {
            FigureState::Initialized(canvas) => Ok(canvas),
            FigureState::Empty | FigureState::Saved => Err(RenderError::AlreadySaved),
        }
    }
}

/// Legend entry of a stacked histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendEntry {
    /// Tree name.
    pub label: String,
    /// Layer colour.
    pub color: Rgb,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array4;

    use super::*;

    fn labels(rows: usize, columns: usize) -> GridLabels {
        GridLabels::new(
            (0..rows).map(|r| format!("Channel {r}")).collect(),
            (0..columns).map(|c| format!("FEATURE{c}")).collect(),
        )
    }

    fn tensor(planes: usize, features: usize, value: f32) -> FeatureTensor {
        FeatureTensor::from_f32(&Array4::from_shape_fn((6, 5, planes, features), |(y, x, _, _)| {
            #[allow(clippy::cast_precision_loss)]
            let v = value + (y * 5 + x) as f32 / 100.0;
            v
        }))
    }

    #[test]
    fn empty_figure_renders_nothing() {
        let mut figure = Figure::new(PlotKind::HistogramGrid, labels(2, 3));
        assert!(matches!(figure.state(), FigureState::Empty));
        assert!(figure.render().is_none());
        assert!(matches!(figure.state(), FigureState::Empty));
    }

    #[test]
    fn lifecycle_moves_to_saved() {
        let mut figure = Figure::new(PlotKind::HistogramGrid, labels(2, 3));
        figure.plot_tensor(&tensor(2, 3, 0.1), "Ficus").unwrap();
        assert!(matches!(figure.state(), FigureState::Initialized(_)));

        let svg = figure.render().unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("FEATURE2"));
        assert!(svg.contains("Channel 1"));
        assert!(matches!(figure.state(), FigureState::Saved));

        assert!(figure.render().is_none());
        assert!(matches!(
            figure.plot_tensor(&tensor(2, 3, 0.1), "Ficus"),
            Err(RenderError::AlreadySaved)
        ));
    }

    #[test]
    fn mismatched_tensor_is_rejected_without_initializing() {
        let mut figure = Figure::new(PlotKind::ImageGrid, labels(8, 7));
        let err = figure.plot_tensor(&tensor(2, 7, 0.1), "Ficus").unwrap_err();
        assert!(matches!(err, RenderError::ShapeMismatch { planes: 2, rows: 8, .. }));
        assert!(matches!(figure.state(), FigureState::Empty));
    }

    #[test]
    fn stacked_legend_has_one_entry_per_tree() {
        let mut figure = Figure::new(PlotKind::StackedHistogram, labels(2, 2));
        figure.plot_tensor(&tensor(2, 2, 0.1), "Shorea").unwrap();
        figure.plot_tensor(&tensor(2, 2, 0.4), "Macaranga").unwrap();
        let svg = figure.render().unwrap();
        assert_eq!(svg.matches(">Shorea<").count(), 1);
        assert_eq!(svg.matches(">Macaranga<").count(), 1);
        assert!(svg.contains(&categorical(1).hex()));
    }

    #[test]
    fn image_grid_embeds_png() {
        let mut figure = Figure::new(PlotKind::ImageGrid, labels(1, 2));
        figure.plot_tensor(&tensor(1, 2, 0.2), "Ficus").unwrap();
        let svg = figure.render().unwrap();
        assert_eq!(svg.matches("data:image/png;base64,").count(), 2);
    }

    #[test]
    fn per_set_kind_and_names() {
        assert!(PlotKind::StackedHistogram.is_per_set());
        assert!(!PlotKind::ImageGrid.is_per_set());
        assert_eq!(PlotKind::HistogramGrid.file_name("A_0"), "A_0_hist.svg");
        assert_eq!(PlotKind::ImageGrid.size(), (2000, 2000));
    }
}

//! SVG rendering of report grids.
//!
//! A [`Canvas`] holds what has been drawn into each grid cell: either an
//! embedded PNG of a feature map or one or more histogram layers. Axis
//! ranges are only fixed when the document is produced, so stacked
//! layers added over many regions share one scale per cell.
//!
//! Feature maps are rasterized with [`tiny_skia`] and embedded as
//! base64 `data:` URIs so each report is a single self-contained file.
//! Document construction uses the [`svg`] crate.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ndarray::ArrayView2;
use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Element, Path, Rectangle, Title};
use svg::node::{Node, Text};
use tiny_skia::Pixmap;

use crate::colormap::{Rgb, categorical, viridis};
use crate::figure::{GridLabels, LegendEntry, PlotKind, RenderError};
use crate::histogram::Histogram;

/// Left margin for row labels, as a share of the document width.
const LABEL_RATIO: f32 = 0.15;
/// Space above the grid for column titles, in pixels.
const TOP_MARGIN: f32 = 50.0;
/// Space below and right of the grid, in pixels.
const EDGE_MARGIN: f32 = 20.0;
/// Gap between cells, in pixels.
const CELL_GAP: f32 = 10.0;
const FONT_SIZE: f32 = 16.0;

/// A feature map rasterized to PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMap {
    width: u32,
    height: u32,
    data_uri: String,
}

impl EncodedMap {
    /// Raster width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Raster height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// `data:image/png;base64,...` URI.
    #[must_use]
    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }
}

/// One histogram drawn into a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Bars to draw.
    pub histogram: Histogram,
    /// Fill colour.
    pub color: Rgb,
    /// Fill opacity.
    pub alpha: f32,
}

/// Contents of one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// A colour-mapped feature map.
    Image(EncodedMap),
    /// Histogram layers, drawn in order.
    Bars(Vec<Layer>),
}

/// Grid contents of an initialized figure.
#[derive(Debug)]
pub struct Canvas {
    kind: PlotKind,
    rows: usize,
    columns: usize,
    cells: Vec<Option<Cell>>,
    legend: Vec<LegendEntry>,
}

impl Canvas {
    pub(crate) fn new(kind: PlotKind, rows: usize, columns: usize) -> Self {
        Self {
            kind,
            rows,
            columns,
            cells: vec![None; rows * columns],
            legend: Vec::new(),
        }
    }

    pub(crate) fn set(&mut self, row: usize, column: usize, cell: Cell) {
        if let Some(slot) = self.slot(row, column) {
            *slot = Some(cell);
        }
    }

    /// Start a new stacked layer group labelled `label`.
    pub(crate) fn begin_layer(&mut self, label: &str) {
        let color = categorical(self.legend.len());
        self.legend.push(LegendEntry {
            label: label.to_owned(),
            color,
        });
    }

    /// Colour of the current layer group.
    pub(crate) fn layer_color(&self) -> Rgb {
        self.legend.last().map_or(categorical(0), |entry| entry.color)
    }

    pub(crate) fn push_layer(&mut self, row: usize, column: usize, layer: Layer) {
        if let Some(slot) = self.slot(row, column) {
            match slot {
                Some(Cell::Bars(layers)) => layers.push(layer),
                other => *other = Some(Cell::Bars(vec![layer])),
            }
        }
    }

    /// Legend entries in drawing order.
    #[must_use]
    pub fn legend(&self) -> &[LegendEntry] {
        &self.legend
    }

    fn slot(&mut self, row: usize, column: usize) -> Option<&mut Option<Cell>> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.cells.get_mut(row * self.columns + column)
    }

    /// Produce the SVG document.
    pub(crate) fn to_document(&self, labels: &GridLabels) -> String {
        let (width, height) = self.kind.size();
        let layout = Layout::new(self.kind, self.rows, self.columns);

        let mut doc = Document::new()
            .set("width", width)
            .set("height", height)
            .set("viewBox", (0, 0, width, height))
            .set("font-family", "sans-serif")
            .set("font-size", FONT_SIZE);
        doc = doc.add(Title::new(self.kind.title()));
        doc = doc.add(
            Rectangle::new()
                .set("width", "100%")
                .set("height", "100%")
                .set("fill", "white"),
        );

        for row in 0..self.rows {
            for column in 0..self.columns {
                let frame = layout.cell(row, column);
                doc = doc.add(frame.outline());
                if row == 0
                    && let Some(title) = labels.columns.get(column)
                {
                    doc = doc.add(text(
                        frame.x + frame.w / 2.0,
                        frame.y - FONT_SIZE / 2.0,
                        "middle",
                        title,
                    ));
                }
                if column == 0
                    && let Some(label) = labels.rows.get(row)
                {
                    doc = doc.add(text(
                        frame.x - CELL_GAP,
                        frame.y + frame.h / 2.0,
                        "end",
                        label,
                    ));
                }
                match &self.cells[row * self.columns + column] {
                    Some(Cell::Image(map)) => doc = doc.add(frame.image(map)),
                    Some(Cell::Bars(layers)) => {
                        for path in frame.bars(layers) {
                            doc = doc.add(path);
                        }
                    }
                    None => {}
                }
            }
        }

        if !self.legend.is_empty() {
            let x = layout.right + CELL_GAP;
            for (i, entry) in self.legend.iter().enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let y = (i as f32).mul_add(FONT_SIZE * 1.5, TOP_MARGIN);
                doc = doc.add(
                    Rectangle::new()
                        .set("x", x)
                        .set("y", y)
                        .set("width", FONT_SIZE)
                        .set("height", FONT_SIZE)
                        .set("fill", entry.color.hex())
                        .set("fill-opacity", crate::figure::STACKED_ALPHA),
                );
                doc = doc.add(text(x + FONT_SIZE * 1.5, y + FONT_SIZE / 2.0, "start", &entry.label));
            }
        }

        // The svg crate omits the XML declaration, so we prepend it.
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
    }
}

/// Rasterize a feature map through the viridis ramp, scaled to its own
/// finite min and max. Non-finite pixels are transparent.
///
/// # Errors
///
/// Returns [`RenderError::Encode`] if the map is empty or PNG encoding
/// fails.
pub fn encode_feature_map(map: ArrayView2<'_, f32>) -> Result<EncodedMap, RenderError> {
    let (rows, columns) = map.dim();
    let too_large = |_| RenderError::Encode(format!("{rows}x{columns} map is too large"));
    let height = u32::try_from(rows).map_err(too_large)?;
    let width = u32::try_from(columns).map_err(too_large)?;
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| RenderError::Encode(format!("cannot rasterize a {rows}x{columns} map")))?;

    let (lo, hi) = map
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;

    for (pixel, &v) in pixmap.data_mut().chunks_exact_mut(4).zip(map.iter()) {
        if !v.is_finite() {
            pixel.copy_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        let t = if range > 0.0 { (v - lo) / range } else { 0.0 };
        let Rgb(r, g, b) = viridis(t);
        pixel.copy_from_slice(&[r, g, b, 255]);
    }

    let png = pixmap
        .encode_png()
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(EncodedMap {
        width,
        height,
        data_uri: format!("data:image/png;base64,{}", STANDARD.encode(png)),
    })
}

/// A `<text>` element. Content is XML-escaped by the svg crate.
fn text(x: f32, y: f32, anchor: &str, content: &str) -> Element {
    let mut el = Element::new("text");
    el.assign("x", x);
    el.assign("y", y);
    el.assign("text-anchor", anchor);
    el.assign("dominant-baseline", "middle");
    el.append(Text::new(content));
    el
}

/// Pixel rectangle of one grid cell.
#[derive(Debug, Clone, Copy)]
struct Frame {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl Frame {
    fn outline(self) -> Rectangle {
        Rectangle::new()
            .set("x", self.x)
            .set("y", self.y)
            .set("width", self.w)
            .set("height", self.h)
            .set("fill", "none")
            .set("stroke", "#cccccc")
    }

    fn image(self, map: &EncodedMap) -> Element {
        let mut el = Element::new("image");
        el.assign("x", self.x);
        el.assign("y", self.y);
        el.assign("width", self.w);
        el.assign("height", self.h);
        el.assign("preserveAspectRatio", "xMidYMid meet");
        el.assign("style", "image-rendering:pixelated");
        el.assign("href", map.data_uri());
        el
    }

    /// One closed step outline per layer, on a scale shared by all
    /// layers of the cell.
    fn bars(self, layers: &[Layer]) -> Vec<Path> {
        let lo = layers.iter().map(|l| l.histogram.lo()).fold(f32::INFINITY, f32::min);
        let hi = layers.iter().map(|l| l.histogram.hi()).fold(f32::NEG_INFINITY, f32::max);
        let peak = layers.iter().map(|l| l.histogram.peak()).fold(0.0, f32::max);
        if !(hi > lo && peak > 0.0) {
            return Vec::new();
        }
        let sx = |v: f32| self.x + (v - lo) / (hi - lo) * self.w;
        let sy = |v: f32| self.y + self.h - v / peak * self.h;
        let base = self.y + self.h;

        layers
            .iter()
            .map(|layer| {
                let histogram: &Histogram = &layer.histogram;
                let step = histogram.bin_width();
                let mut data = Data::new().move_to((sx(histogram.lo()), base));
                for (i, &height) in histogram.heights().iter().enumerate() {
                    #[allow(clippy::cast_precision_loss)]
                    let left = (i as f32).mul_add(step, histogram.lo());
                    data = data
                        .line_to((sx(left), sy(height)))
                        .line_to((sx(left + step), sy(height)));
                }
                data = data.line_to((sx(histogram.hi()), base)).close();
                Path::new()
                    .set("d", data)
                    .set("fill", layer.color.hex())
                    .set("fill-opacity", layer.alpha)
                    .set("stroke", layer.color.hex())
                    .set("stroke-width", 0.5)
            })
            .collect()
    }
}

/// Grid geometry of a document.
struct Layout {
    left: f32,
    top: f32,
    right: f32,
    cell_w: f32,
    cell_h: f32,
}

impl Layout {
    #[allow(clippy::cast_precision_loss)]
    fn new(kind: PlotKind, rows: usize, columns: usize) -> Self {
        let (width, height) = kind.size();
        let (width, height) = (width as f32, height as f32);
        let left = width * LABEL_RATIO;
        let right = width.mul_add(-kind.legend_ratio(), width) - EDGE_MARGIN;
        let top = TOP_MARGIN;
        let bottom = height - EDGE_MARGIN;
        let (rows, columns) = (rows.max(1) as f32, columns.max(1) as f32);
        Self {
            left,
            top,
            right,
            cell_w: (right - left) / columns,
            cell_h: (bottom - top) / rows,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn cell(&self, row: usize, column: usize) -> Frame {
        let half_gap = CELL_GAP / 2.0;
        Frame {
            x: (column as f32).mul_add(self.cell_w, self.left) + half_gap,
            y: (row as f32).mul_add(self.cell_h, self.top) + half_gap,
            w: self.cell_w - CELL_GAP,
            h: self.cell_h - CELL_GAP,
        }
    }
}

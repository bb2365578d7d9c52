//! crownscan-report: Pure report rendering (sans-IO)
//!
//! Draws feature tensors into three SVG plots: a per-region grid of
//! feature maps, a per-region grid of histograms, and a per-set overlay
//! of density histograms. Rows are tensor planes, columns are features.
//!
//! Rendering returns `String`s; deciding whether a plot already exists
//! and writing it lives in `crownscan-io`.

pub mod colormap;
pub mod figure;
pub mod histogram;
pub mod svg;

pub use figure::{Figure, FigureState, GridLabels, LegendEntry, PlotKind, RenderError};
pub use histogram::Histogram;

/// Legend label of a region: its artifact stem up to the first `_`.
///
/// ```
/// assert_eq!(crownscan_report::tree_name("Shorea Leprosula_12"), "Shorea Leprosula");
/// assert_eq!(crownscan_report::tree_name("Unlabelled"), "Unlabelled");
/// ```
#[must_use]
pub fn tree_name(stem: &str) -> &str {
    stem.split('_').next().unwrap_or(stem)
}

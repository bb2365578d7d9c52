//! Shared types for the crownscan pipeline.

use std::fmt;
use std::num::NonZeroUsize;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Re-export `f16` so downstream crates can name the on-disk element
/// type without depending on `half` directly.
pub use half::f16;

/// Tolerance applied to the "normalized values stay within `[0, 1]`"
/// check. Bit-depth division is exact for integer rasters, so this only
/// absorbs float noise from per-pixel rescaling.
pub const NORMALIZED_TOLERANCE: f32 = 1e-6;

/// A rectangular window in pixel coordinates, `y` downward and `x`
/// rightward. Upper bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    /// First row (inclusive).
    pub y0: usize,
    /// Last row (exclusive).
    pub y1: usize,
    /// First column (inclusive).
    pub x0: usize,
    /// Last column (exclusive).
    pub x1: usize,
}

impl Bounds {
    /// Create bounds from `(y0, y1, x0, x1)`.
    #[must_use]
    pub const fn new(y0: usize, y1: usize, x0: usize, x1: usize) -> Self {
        Self { y0, y1, x0, x1 }
    }

    /// Floor-divide every coordinate by `factor`, matching the row/column
    /// striding applied to the image so crops stay spatially aligned.
    ///
    /// ```
    /// use std::num::NonZeroUsize;
    /// use crownscan_pipeline::Bounds;
    ///
    /// let k = NonZeroUsize::new(3).unwrap();
    /// assert_eq!(Bounds::new(30, 60, 9, 21).scaled(k), Bounds::new(10, 20, 3, 7));
    /// ```
    #[must_use]
    pub const fn scaled(self, factor: NonZeroUsize) -> Self {
        let k = factor.get();
        Self {
            y0: self.y0 / k,
            y1: self.y1 / k,
            x0: self.x0 / k,
            x1: self.x1 / k,
        }
    }

    /// Number of rows covered (zero when the bounds are inverted).
    #[must_use]
    pub const fn height(self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    /// Number of columns covered (zero when the bounds are inverted).
    #[must_use]
    pub const fn width(self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    /// Whether the window is non-empty and lies inside an image of the
    /// given height and width.
    #[must_use]
    pub const fn fits_within(self, height: usize, width: usize) -> bool {
        self.y0 < self.y1 && self.x0 < self.x1 && self.y1 <= height && self.x1 <= width
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "y {}..{}, x {}..{}",
            self.y0, self.y1, self.x0, self.x1
        )
    }
}

/// One labelled crown crop from the bounds source.
///
/// `row` is the zero-based data row in the bounds source. Crown names
/// repeat (several trees of one species), so the row disambiguates the
/// artifact key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Label from the `name` column, typically the species.
    pub name: String,
    /// Zero-based data row index in the bounds source.
    pub row: usize,
    /// Window in source-resolution pixels.
    pub bounds: Bounds,
}

impl Region {
    /// Artifact key: `{name}_{row}`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}_{}", self.name, self.row)
    }
}

/// Integer factor by which rows and columns are strided before slicing.
pub type ScaleDivision = NonZeroUsize;

/// A stack of co-registered rasters, one plane per spectral channel.
///
/// Values are normalized by bit depth so they lie in `[0, 1]`; the
/// constructor in [`crate::channels::assemble`] enforces this and the
/// label/axis alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiChannelImage {
    pub(crate) data: Array3<f32>,
    pub(crate) labels: Vec<String>,
}

impl MultiChannelImage {
    /// Pixel data, shape `(height, width, channels)`.
    #[must_use]
    pub const fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Channel display names, aligned 1:1 with the last axis.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    /// Number of channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Consume the image and return its pixel data and labels.
    #[must_use]
    pub fn into_parts(self) -> (Array3<f32>, Vec<String>) {
        (self.data, self.labels)
    }
}

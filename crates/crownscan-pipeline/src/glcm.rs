//! Grey-level co-occurrence matrix (GLCM) texture kernel.
//!
//! For every output pixel a square window of side `2 * radius + 1` is
//! quantized into `bin_to` grey levels and paired with the same window
//! shifted by `step_size` pixels in four directions (E, SE, S, SW). Each
//! direction yields a symmetric co-occurrence distribution from which six
//! statistics are computed; the four directions are averaged.
//!
//! In cross-channel mode the window of one channel is paired with the
//! same window of another channel (no spatial shift), once per unordered
//! channel pair.
//!
//! All features are scaled to `[0, 1]`:
//!
//! | Feature     | Definition                              | Scale            |
//! |-------------|-----------------------------------------|------------------|
//! | HOMOGENEITY | `Σ p(i,j) / (1 + (i-j)²)`               | as is            |
//! | CONTRAST    | `Σ p(i,j) (i-j)²`                       | `/ (bins-1)²`    |
//! | ASM         | `Σ p(i,j)²`                             | as is            |
//! | MEAN        | `Σ p(i,j) i`                            | `/ (bins-1)`     |
//! | VAR         | `Σ p(i,j) (i-μ)²`                       | `/ (bins-1)²`    |
//! | CORRELATION | `Σ p(i,j) (i-μ)(j-μ) / σ²`              | `(c + 1) / 2`    |
//!
//! A window with zero variance reports a correlation of 1. Pixels that
//! are not finite are left out of the distribution; a window with no
//! valid pairs yields NaN features.

use ndarray::{Array2, Array4, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::kernel::{FeatureKernel, KernelError, output_size};

/// Feature names in output order.
pub const FEATURES: [&str; 6] = [
    "HOMOGENEITY",
    "CONTRAST",
    "ASM",
    "MEAN",
    "VAR",
    "CORRELATION",
];

/// Number of features per plane.
pub const FEATURE_COUNT: usize = FEATURES.len();

/// Pixel offsets `(dy, dx)` for the E, SE, S and SW directions.
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 1), (1, 0), (1, -1)];

/// Quantized value of a non-finite pixel.
const NO_BIN: u16 = u16::MAX;

/// GLCM parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlcmConfig {
    /// Upper end of the input value range; values in `[0, bin_from]`
    /// are spread over `bin_to` levels.
    pub bin_from: f32,
    /// Number of grey levels.
    pub bin_to: u16,
    /// Window radius in pixels.
    pub radius: usize,
    /// Pixel distance between paired values (single-channel mode only).
    pub step_size: usize,
    /// Pair channels with each other instead of with shifted windows.
    pub cross: bool,
}

impl GlcmConfig {
    /// Default window radius.
    pub const DEFAULT_RADIUS: usize = 4;
    /// Default pairing distance.
    pub const DEFAULT_STEP_SIZE: usize = 1;
    /// Default number of grey levels.
    pub const DEFAULT_BIN_TO: u16 = 128;

    /// Pixels lost from each side of a crop.
    #[must_use]
    pub const fn margin(&self) -> usize {
        if self.cross {
            self.radius
        } else {
            self.radius + self.step_size
        }
    }
}

impl Default for GlcmConfig {
    fn default() -> Self {
        Self {
            bin_from: 1.0,
            bin_to: Self::DEFAULT_BIN_TO,
            radius: Self::DEFAULT_RADIUS,
            step_size: Self::DEFAULT_STEP_SIZE,
            cross: false,
        }
    }
}

/// CPU GLCM implementation of [`FeatureKernel`].
#[derive(Debug, Clone)]
pub struct GlcmKernel {
    config: GlcmConfig,
}

impl GlcmKernel {
    /// Create a kernel after validating its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidConfig`] if there are fewer than two
    /// grey levels, the value range is not positive, the radius is zero,
    /// or the step size is zero in single-channel mode.
    pub fn new(config: GlcmConfig) -> Result<Self, KernelError> {
        if config.bin_to < 2 || config.bin_to == NO_BIN {
            return Err(KernelError::InvalidConfig(format!(
                "bin_to must be in 2..{NO_BIN}, got {}",
                config.bin_to
            )));
        }
        if !(config.bin_from.is_finite() && config.bin_from > 0.0) {
            return Err(KernelError::InvalidConfig(format!(
                "bin_from must be positive, got {}",
                config.bin_from
            )));
        }
        if config.radius == 0 {
            return Err(KernelError::InvalidConfig("radius must be at least 1".into()));
        }
        if !config.cross && config.step_size == 0 {
            return Err(KernelError::InvalidConfig(
                "step_size must be at least 1".into(),
            ));
        }
        Ok(Self { config })
    }

    /// The kernel parameters.
    #[must_use]
    pub const fn config(&self) -> &GlcmConfig {
        &self.config
    }

    fn quantize(&self, plane: ArrayView2<'_, f32>) -> Array2<u16> {
        let bins = f32::from(self.config.bin_to);
        let top = self.config.bin_to - 1;
        let bin_from = self.config.bin_from;
        plane.mapv(|v| {
            if !v.is_finite() {
                return NO_BIN;
            }
            let level = (v / bin_from * bins).floor().max(0.0);
            // Clamped to `top`, which fits in u16.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let level = level.min(f32::from(top)) as u16;
            level
        })
    }

    fn compute_single(&self, crop: ArrayView3<'_, f32>) -> Result<Array4<f32>, KernelError> {
        let (height, width, channels) = crop.dim();
        let margin = self.margin();
        let (out_h, out_w) = output_size(height, width, margin)?;
        let radius = self.config.radius;
        // Offsets stay within the crop because margin = radius + step.
        #[allow(clippy::cast_possible_wrap)]
        let step = self.config.step_size as isize;

        let mut out = Array4::zeros((out_h, out_w, channels, FEATURE_COUNT));
        let mut acc = CoOccurrence::new(self.config.bin_to);

        for channel in 0..channels {
            let levels = self.quantize(crop.index_axis(Axis(2), channel));
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let (cy, cx) = (oy + margin, ox + margin);
                    let mut sums = [0.0_f64; FEATURE_COUNT];
                    for (dy, dx) in DIRECTIONS {
                        acc.clear();
                        for wy in cy - radius..=cy + radius {
                            let ny = wy.wrapping_add_signed(dy * step);
                            for wx in cx - radius..=cx + radius {
                                let nx = wx.wrapping_add_signed(dx * step);
                                acc.push(levels[[wy, wx]], levels[[ny, nx]]);
                            }
                        }
                        for (sum, value) in sums.iter_mut().zip(acc.features()) {
                            *sum += value;
                        }
                    }
                    #[allow(clippy::cast_precision_loss)]
                    let directions = DIRECTIONS.len() as f64;
                    for (feature, sum) in sums.iter().enumerate() {
                        #[allow(clippy::cast_possible_truncation)]
                        let value = (sum / directions) as f32;
                        out[[oy, ox, channel, feature]] = value;
                    }
                }
            }
        }
        Ok(out)
    }

    fn compute_cross(&self, crop: ArrayView3<'_, f32>) -> Result<Array4<f32>, KernelError> {
        let (height, width, channels) = crop.dim();
        let pairs = channel_pairs(channels);
        if pairs.is_empty() {
            return Err(KernelError::NoChannelPairs(channels));
        }
        let radius = self.config.radius;
        let (out_h, out_w) = output_size(height, width, radius)?;

        let levels: Vec<Array2<u16>> = (0..channels)
            .map(|c| self.quantize(crop.index_axis(Axis(2), c)))
            .collect();
        let mut out = Array4::zeros((out_h, out_w, pairs.len(), FEATURE_COUNT));
        let mut acc = CoOccurrence::new(self.config.bin_to);

        for (plane, &(a, b)) in pairs.iter().enumerate() {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let (cy, cx) = (oy + radius, ox + radius);
                    acc.clear();
                    for wy in cy - radius..=cy + radius {
                        for wx in cx - radius..=cx + radius {
                            acc.push(levels[a][[wy, wx]], levels[b][[wy, wx]]);
                        }
                    }
                    for (feature, value) in acc.features().into_iter().enumerate() {
                        #[allow(clippy::cast_possible_truncation)]
                        let value = value as f32;
                        out[[oy, ox, plane, feature]] = value;
                    }
                }
            }
        }
        Ok(out)
    }
}

impl FeatureKernel for GlcmKernel {
    fn margin(&self) -> usize {
        self.config.margin()
    }

    fn is_cross_channel(&self) -> bool {
        self.config.cross
    }

    fn feature_names(&self) -> &[&'static str] {
        &FEATURES
    }

    fn plane_labels(&self, channel_labels: &[String]) -> Vec<String> {
        if !self.config.cross {
            return channel_labels.to_vec();
        }
        channel_pairs(channel_labels.len())
            .into_iter()
            .map(|(a, b)| format!("('{}', '{}')", channel_labels[a], channel_labels[b]))
            .collect()
    }

    fn compute(&self, crop: ArrayView3<'_, f32>) -> Result<Array4<f32>, KernelError> {
        if self.config.cross {
            self.compute_cross(crop)
        } else {
            self.compute_single(crop)
        }
    }
}

/// Unordered channel pairs `(a, b)` with `a < b`, in lexicographic order.
#[must_use]
pub fn channel_pairs(channels: usize) -> Vec<(usize, usize)> {
    (0..channels)
        .flat_map(|a| (a + 1..channels).map(move |b| (a, b)))
        .collect()
}

/// Sparse symmetric co-occurrence counts for one window and direction.
///
/// Stores each pair as a packed `i * bins + j` key; sorting groups equal
/// pairs so statistics can be computed without a dense `bins²` matrix.
struct CoOccurrence {
    bins: u32,
    keys: Vec<u32>,
}

impl CoOccurrence {
    fn new(bins: u16) -> Self {
        Self {
            bins: u32::from(bins),
            keys: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.keys.clear();
    }

    fn push(&mut self, a: u16, b: u16) {
        if a == NO_BIN || b == NO_BIN {
            return;
        }
        let (a, b) = (u32::from(a), u32::from(b));
        self.keys.push(a * self.bins + b);
        self.keys.push(b * self.bins + a);
    }

    fn features(&mut self) -> [f64; FEATURE_COUNT] {
        if self.keys.is_empty() {
            return [f64::NAN; FEATURE_COUNT];
        }
        self.keys.sort_unstable();
        let bins = self.bins;
        #[allow(clippy::cast_precision_loss)]
        let total = self.keys.len() as f64;
        let cells = || {
            self.keys.chunk_by(|a, b| a == b).map(move |run| {
                let key = run[0];
                #[allow(clippy::cast_precision_loss)]
                let p = run.len() as f64 / total;
                (f64::from(key / bins), f64::from(key % bins), p)
            })
        };

        let (mut homogeneity, mut contrast, mut asm, mut mean) = (0.0, 0.0, 0.0, 0.0);
        for (i, j, p) in cells() {
            let d = i - j;
            homogeneity += p / d.mul_add(d, 1.0);
            contrast += p * d * d;
            asm += p * p;
            mean += p * i;
        }

        let (mut var, mut cov) = (0.0, 0.0);
        for (i, j, p) in cells() {
            var += p * (i - mean) * (i - mean);
            cov += p * (i - mean) * (j - mean);
        }

        let correlation = if var > f64::EPSILON { cov / var } else { 1.0 };
        let top = f64::from(bins - 1);
        [
            homogeneity,
            contrast / (top * top),
            asm,
            mean / top,
            var / (top * top),
            f64::midpoint(correlation, 1.0),
        ]
    }
}

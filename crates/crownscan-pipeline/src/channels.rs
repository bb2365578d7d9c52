//! Channel descriptors and multi-channel image assembly.
//!
//! Each source raster contributes one or more channels to the combined
//! image. A [`ChannelDescriptor`] records, per file name, how many bits
//! the sensor used, which samples to keep, and what to call them.
//! [`assemble`] normalizes every decoded raster by its bit depth, selects
//! or promotes channels, and concatenates them along the channel axis in
//! the order given.
//!
//! Decoding is not done here: callers hand in raw sample values as
//! `(height, width, samples)` arrays.

use ndarray::{Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::types::{MultiChannelImage, NORMALIZED_TOLERANCE};

/// Which decoder reads a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderKind {
    /// Baseline TIFF via the `tiff` crate, any sample layout.
    #[default]
    Tiff,
    /// Common formats (PNG, JPEG) via the `image` crate.
    Image,
}

/// How a source file contributes channels.
///
/// `channels: None` promotes a single-band raster to one channel;
/// `Some(indices)` keeps the listed samples, in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// File name this descriptor applies to (no directory).
    pub file_name: String,
    /// Sensor bit depth; raw values are divided by `2^bits`.
    pub bits: u32,
    /// Sample indices to keep, or `None` for a single-band raster.
    pub channels: Option<Vec<usize>>,
    /// Display names, one per contributed channel.
    pub names: Vec<String>,
    /// Decoder for this file.
    #[serde(default)]
    pub reader: ReaderKind,
}

impl ChannelDescriptor {
    fn single(file_name: &str, bits: u32, name: &str) -> Self {
        Self {
            file_name: file_name.to_owned(),
            bits,
            channels: None,
            names: vec![name.to_owned()],
            reader: ReaderKind::Tiff,
        }
    }

    /// Number of channels this file contributes.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.as_ref().map_or(1, Vec::len)
    }

    /// Divisor that maps raw sample values into `[0, 1)`.
    #[must_use]
    pub fn scale(&self) -> f32 {
        // Exact for every practical sensor depth.
        #[allow(clippy::cast_precision_loss)]
        let scale = (1_u64 << self.bits.min(63)) as f32;
        scale
    }
}

/// Ordered lookup table of [`ChannelDescriptor`]s keyed by file name.
///
/// Table order doubles as the canonical file processing order, which
/// fixes the channel order of every image assembled from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTable(Vec<ChannelDescriptor>);

impl ChannelTable {
    /// Create a table from descriptors in processing order.
    #[must_use]
    pub const fn new(descriptors: Vec<ChannelDescriptor>) -> Self {
        Self(descriptors)
    }

    /// Find the descriptor for a file name.
    #[must_use]
    pub fn lookup(&self, file_name: &str) -> Option<&ChannelDescriptor> {
        self.0.iter().find(|d| d.file_name == file_name)
    }

    /// Position of a file name in processing order.
    #[must_use]
    pub fn position(&self, file_name: &str) -> Option<usize> {
        self.0.iter().position(|d| d.file_name == file_name)
    }

    /// All descriptors in processing order.
    #[must_use]
    pub fn descriptors(&self) -> &[ChannelDescriptor] {
        &self.0
    }

    /// Channel labels of an image assembled from every file in the table.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.0.iter().flat_map(|d| d.names.iter().cloned()).collect()
    }
}

impl Default for ChannelTable {
    /// The six exports of a multispectral stitching run: an 8-bit
    /// wideband RGB mosaic and five 14-bit narrowband mosaics.
    fn default() -> Self {
        Self(vec![
            ChannelDescriptor {
                file_name: "result.tif".to_owned(),
                bits: 8,
                channels: Some(vec![0, 1, 2]),
                names: vec![
                    "Wideband Red".to_owned(),
                    "Wideband Green".to_owned(),
                    "Wideband Blue".to_owned(),
                ],
                reader: ReaderKind::Tiff,
            },
            ChannelDescriptor::single("result_RedEdge.tif", 14, "RedEdge"),
            ChannelDescriptor::single("result_Blue.tif", 14, "Blue"),
            ChannelDescriptor::single("result_NIR.tif", 14, "NIR"),
            ChannelDescriptor::single("result_Red.tif", 14, "Red"),
            ChannelDescriptor::single("result_Green.tif", 14, "Green"),
        ])
    }
}

/// Errors raised while assembling a multi-channel image.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No rasters were supplied.
    #[error("no rasters to assemble")]
    Empty,

    /// A descriptor selects a sample the raster does not have.
    #[error("{file}: channel index {index} out of range for {samples} sample(s)")]
    ChannelOutOfRange {
        /// Source file name.
        file: String,
        /// Offending index.
        index: usize,
        /// Samples present in the decoded raster.
        samples: usize,
    },

    /// A single-band descriptor was applied to a multi-sample raster.
    #[error("{file}: expected a single-band raster, found {samples} samples")]
    NotSingleBand {
        /// Source file name.
        file: String,
        /// Samples present in the decoded raster.
        samples: usize,
    },

    /// Rasters do not share the same height and width.
    #[error("{file}: raster is {found:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Source file name.
        file: String,
        /// `(height, width)` of earlier rasters.
        expected: (usize, usize),
        /// `(height, width)` of this raster.
        found: (usize, usize),
    },

    /// Channel labels and channel axis disagree.
    #[error("channel label count {labels} does not match channel dimension {channels}")]
    LabelMismatch {
        /// Number of labels.
        labels: usize,
        /// Size of the channel axis.
        channels: usize,
    },

    /// Channel planes could not be stacked.
    #[error("failed to stack channel planes: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// A normalized value exceeds 1.
    #[error("normalized value {0} exceeds 1; check the configured bit depths")]
    OutOfRange(f32),
}

/// One decoded raster paired with its descriptor.
#[derive(Debug, Clone, Copy)]
pub struct RawRaster<'a> {
    /// How to interpret the samples.
    pub descriptor: &'a ChannelDescriptor,
    /// Raw sample values, shape `(height, width, samples)`.
    pub samples: ArrayView3<'a, f32>,
}

/// Normalize one raster by its bit depth and select its channels.
///
/// # Errors
///
/// Returns [`ChannelError::ChannelOutOfRange`] or
/// [`ChannelError::NotSingleBand`] when the descriptor does not fit the
/// decoded sample layout.
pub fn prepare(raster: RawRaster<'_>) -> Result<Array3<f32>, ChannelError> {
    let descriptor = raster.descriptor;
    let samples = raster.samples.dim().2;
    let scale = descriptor.scale();

    let selected = match &descriptor.channels {
        None => {
            if samples != 1 {
                return Err(ChannelError::NotSingleBand {
                    file: descriptor.file_name.clone(),
                    samples,
                });
            }
            raster.samples.to_owned()
        }
        Some(indices) => {
            if let Some(&index) = indices.iter().find(|&&i| i >= samples) {
                return Err(ChannelError::ChannelOutOfRange {
                    file: descriptor.file_name.clone(),
                    index,
                    samples,
                });
            }
            raster.samples.select(Axis(2), indices)
        }
    };

    Ok(selected.mapv(|v| v / scale))
}

/// Assemble decoded rasters into one normalized [`MultiChannelImage`].
///
/// Channels and labels are concatenated in the order of `rasters`. When
/// `normalize_per_pixel` is set every pixel's channel vector is rescaled
/// to its own min-max range (see [`normalize_per_pixel`]).
///
/// # Errors
///
/// Returns a [`ChannelError`] if a descriptor does not fit its raster,
/// rasters differ in size, or the result fails validation (label count,
/// values above `1 + NORMALIZED_TOLERANCE`).
pub fn assemble(
    rasters: &[RawRaster<'_>],
    normalize_per_pixel: bool,
) -> Result<MultiChannelImage, ChannelError> {
    let first = rasters.first().ok_or(ChannelError::Empty)?;
    let (height, width, _) = first.samples.dim();

    let mut planes = Vec::with_capacity(rasters.len());
    let mut labels = Vec::new();
    for raster in rasters {
        let (h, w, _) = raster.samples.dim();
        if (h, w) != (height, width) {
            return Err(ChannelError::ShapeMismatch {
                file: raster.descriptor.file_name.clone(),
                expected: (height, width),
                found: (h, w),
            });
        }
        planes.push(prepare(*raster)?);
        labels.extend(raster.descriptor.names.iter().cloned());
    }

    let views: Vec<_> = planes.iter().map(Array3::view).collect();
    let mut data = ndarray::concatenate(Axis(2), &views)?;

    if normalize_per_pixel {
        data = self::normalize_per_pixel(&data);
    }

    validate(&data, &labels)?;
    Ok(MultiChannelImage { data, labels })
}

/// Rescale every pixel's channel vector to its own min-max range.
///
/// This is lossy: a pixel whose channels are uniformly dim has its
/// brightest channel pushed to 1 and its dimmest to 0, so absolute
/// brightness is lost. Pixels whose channels are all equal become NaN.
#[must_use]
pub fn normalize_per_pixel(data: &Array3<f32>) -> Array3<f32> {
    let mut out = data.clone();
    for mut pixel in out.lanes_mut(Axis(2)) {
        let (lo, hi) = pixel
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = hi - lo;
        pixel.mapv_inplace(|v| (v - lo) / range);
    }
    out
}

/// Largest finite value in an array, or `None` when nothing is finite.
#[must_use]
pub fn finite_max(data: &Array3<f32>) -> Option<f32> {
    data.iter()
        .copied()
        .filter(|v| v.is_finite())
        .reduce(f32::max)
}

fn validate(data: &Array3<f32>, labels: &[String]) -> Result<(), ChannelError> {
    let channels = data.dim().2;
    if labels.len() != channels {
        return Err(ChannelError::LabelMismatch {
            labels: labels.len(),
            channels,
        });
    }
    if let Some(max) = finite_max(data)
        && max > 1.0 + NORMALIZED_TOLERANCE
    {
        return Err(ChannelError::OutOfRange(max));
    }
    Ok(())
}

/// Build a [`MultiChannelImage`] directly from normalized data.
///
/// # Errors
///
/// Returns [`ChannelError::LabelMismatch`] or [`ChannelError::OutOfRange`]
/// on invalid input.
pub fn from_normalized(
    data: Array3<f32>,
    labels: Vec<String>,
) -> Result<MultiChannelImage, ChannelError> {
    validate(&data, &labels)?;
    Ok(MultiChannelImage { data, labels })
}

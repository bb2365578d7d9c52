//! Persisted per-region feature tensor.

use half::f16;
use ndarray::{Array4, ArrayView2, Axis};

/// Half-precision feature tensor, shape `(height, width, planes, features)`.
///
/// `planes` is the channel count, or the channel-pair count for
/// cross-channel kernels. In single-channel mode feature 0 holds the raw
/// intensity aligned to the kernel output.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    data: Array4<f16>,
}

impl FeatureTensor {
    /// Wrap existing half-precision data.
    #[must_use]
    pub const fn new(data: Array4<f16>) -> Self {
        Self { data }
    }

    /// Convert single-precision kernel output to half precision.
    #[must_use]
    pub fn from_f32(data: &Array4<f32>) -> Self {
        Self {
            data: data.mapv(f16::from_f32),
        }
    }

    /// Widen to single precision for analysis or plotting.
    #[must_use]
    pub fn to_f32(&self) -> Array4<f32> {
        self.data.mapv(f16::to_f32)
    }

    /// Stored data.
    #[must_use]
    pub const fn data(&self) -> &Array4<f16> {
        &self.data
    }

    /// `(height, width, planes, features)`.
    #[must_use]
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// Number of planes (channels or channel pairs).
    #[must_use]
    pub fn planes(&self) -> usize {
        self.data.dim().2
    }

    /// Number of features per plane.
    #[must_use]
    pub fn features(&self) -> usize {
        self.data.dim().3
    }

    /// The 2-D map of one feature of one plane, or `None` if out of range.
    #[must_use]
    pub fn map(&self, plane: usize, feature: usize) -> Option<ArrayView2<'_, f16>> {
        if plane >= self.planes() || feature >= self.features() {
            return None;
        }
        Some(
            self.data
                .index_axis(Axis(2), plane)
                .index_axis_move(Axis(2), feature),
        )
    }

    /// Consume the tensor and return the underlying array.
    #[must_use]
    pub fn into_inner(self) -> Array4<f16> {
        self.data
    }
}

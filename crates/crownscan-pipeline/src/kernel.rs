//! Feature kernel: the texture-statistics function applied to each crop.
//!
//! The slicing engine only relies on the [`FeatureKernel`] trait. A
//! kernel is a pure function from a `(height, width, channels)` crop to a
//! `(height - 2m, width - 2m, planes, features)` tensor, where `m` is the
//! kernel's [`margin`](FeatureKernel::margin) and `planes` is either the
//! channel count or, for cross-channel kernels, the number of channel
//! pairs.

use ndarray::{Array4, ArrayView3};

/// Errors a feature kernel can raise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The crop is too small to leave any output after the margin.
    #[error("crop {height}x{width} is too small for margin {margin}")]
    CropTooSmall {
        /// Crop height.
        height: usize,
        /// Crop width.
        width: usize,
        /// Margin removed from every side.
        margin: usize,
    },

    /// A cross-channel kernel needs at least two channels.
    #[error("cross-channel features need at least two channels, found {0}")]
    NoChannelPairs(usize),

    /// Kernel parameters are invalid.
    #[error("invalid kernel configuration: {0}")]
    InvalidConfig(String),
}

/// A texture-feature kernel.
pub trait FeatureKernel {
    /// Pixels lost from every side of the crop.
    fn margin(&self) -> usize;

    /// Whether output planes are channel pairs rather than channels.
    fn is_cross_channel(&self) -> bool;

    /// Names of the features along the last output axis.
    fn feature_names(&self) -> &[&'static str];

    /// Labels for the output planes given the input channel labels.
    fn plane_labels(&self, channel_labels: &[String]) -> Vec<String> {
        channel_labels.to_vec()
    }

    /// Compute the feature tensor for one crop.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] when the crop cannot produce output.
    fn compute(&self, crop: ArrayView3<'_, f32>) -> Result<Array4<f32>, KernelError>;
}

impl<K: FeatureKernel + ?Sized> FeatureKernel for &K {
    fn margin(&self) -> usize {
        (**self).margin()
    }

    fn is_cross_channel(&self) -> bool {
        (**self).is_cross_channel()
    }

    fn feature_names(&self) -> &[&'static str] {
        (**self).feature_names()
    }

    fn plane_labels(&self, channel_labels: &[String]) -> Vec<String> {
        (**self).plane_labels(channel_labels)
    }

    fn compute(&self, crop: ArrayView3<'_, f32>) -> Result<Array4<f32>, KernelError> {
        (**self).compute(crop)
    }
}

/// Output spatial size for a crop, or an error if nothing is left.
///
/// # Errors
///
/// Returns [`KernelError::CropTooSmall`] when `2 * margin` consumes the
/// whole crop in either direction.
pub fn output_size(height: usize, width: usize, margin: usize) -> Result<(usize, usize), KernelError> {
    let lost = 2 * margin;
    if height <= lost || width <= lost {
        return Err(KernelError::CropTooSmall {
            height,
            width,
            margin,
        });
    }
    Ok((height - lost, width - lost))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_size_removes_margin_on_both_sides() {
        assert_eq!(output_size(20, 15, 5), Ok((10, 5)));
    }

    #[test]
    fn output_size_rejects_exhausted_crop() {
        assert_eq!(
            output_size(10, 30, 5),
            Err(KernelError::CropTooSmall {
                height: 10,
                width: 30,
                margin: 5
            })
        );
    }
}

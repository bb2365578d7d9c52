//! crownscan-pipeline: texture-feature extraction for tree-crown imagery
//! (sans-IO).
//!
//! Turns co-registered multispectral rasters into per-crown feature
//! tensors:
//! channel assembly -> downsampling -> min-max scaling -> crop per region
//! -> per-pixel normalization -> feature kernel -> intensity plane ->
//! persist.
//!
//! This crate has **no I/O dependencies** -- rasters arrive as decoded
//! arrays, bounds as text, and artifacts leave through the
//! [`ArtifactStore`] trait. Files and remote storage live in
//! `crownscan-io`.

pub mod bounds;
pub mod cache;
pub mod channels;
pub mod glcm;
pub mod kernel;
pub mod slice;
pub mod tensor;
pub mod types;

pub use bounds::{BoundsError, RegionCatalog};
pub use cache::{Cached, Presence, compute_if_absent};
pub use channels::{ChannelDescriptor, ChannelError, ChannelTable, RawRaster, ReaderKind};
pub use glcm::{GlcmConfig, GlcmKernel};
pub use kernel::{FeatureKernel, KernelError};
pub use slice::{ArtifactStore, NormalizationOrder, SliceConfig, SliceError, SliceSummary};
pub use tensor::FeatureTensor;
pub use types::{Bounds, MultiChannelImage, Region, ScaleDivision, f16};

/// Feature names as shown in reports for tensors produced by `kernel`.
///
/// Single-channel kernels get the raw intensity prepended as feature 0,
/// so `INTENSITY` leads the list; cross-channel tensors are stored as the
/// kernel produced them.
#[must_use]
pub fn stored_feature_names<K: FeatureKernel + ?Sized>(kernel: &K) -> Vec<String> {
    let names = kernel.feature_names().iter().map(|&n| n.to_owned());
    if kernel.is_cross_channel() {
        names.collect()
    } else {
        std::iter::once(INTENSITY.to_owned()).chain(names).collect()
    }
}

/// Name of the raw-intensity feature plane.
pub const INTENSITY: &str = "INTENSITY";

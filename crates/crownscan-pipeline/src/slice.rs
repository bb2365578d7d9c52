//! Slicing engine: crop every catalog region out of a multi-channel image,
//! run the feature kernel on it, and persist the result.
//!
//! Runs are resumable. Each region's artifact is keyed by
//! [`Region::key`]; a key that the store already holds is skipped without
//! cropping or invoking the kernel, so interrupting and re-running a slice
//! only computes what is missing.

use std::num::NonZeroUsize;

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis, concatenate, s};
use serde::{Deserialize, Serialize};

use crate::bounds::RegionCatalog;
use crate::cache::{Cached, Presence, compute_if_absent};
use crate::kernel::{FeatureKernel, KernelError};
use crate::tensor::FeatureTensor;
use crate::types::{Bounds, MultiChannelImage, Region};

/// Boxed error from an [`ArtifactStore`] implementation.
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Order in which min-max scaling and per-pixel normalization apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationOrder {
    /// Min-max scale the whole downsampled image, then divide each pixel
    /// of a crop by its channel sum.
    #[default]
    MinMaxThenPixelNorm,
    /// Divide each pixel of a crop by its channel sum, then min-max scale
    /// that crop on its own.
    PixelNormThenMinMax,
}

/// Slicing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    /// Row and column stride applied to the image and region bounds.
    pub scale_division: NonZeroUsize,
    /// Rescale values to `[0, 1]` by their min and max.
    pub minmax: bool,
    /// Divide each pixel's channel vector by its sum.
    pub pixel_norm: bool,
    /// Which of the two normalizations runs first.
    pub order: NormalizationOrder,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            scale_division: NonZeroUsize::MIN,
            minmax: false,
            pixel_norm: false,
            order: NormalizationOrder::default(),
        }
    }
}

/// Errors from a slicing run.
#[derive(Debug, thiserror::Error)]
pub enum SliceError {
    /// Scaled bounds are empty or extend past the image.
    #[error("region {key}: bounds ({bounds}) do not fit the {height}x{width} image")]
    Bounds {
        /// Artifact key of the region.
        key: String,
        /// Bounds after scaling.
        bounds: Bounds,
        /// Downsampled image height.
        height: usize,
        /// Downsampled image width.
        width: usize,
    },

    /// The feature kernel rejected a crop.
    #[error("region {key}: {source}")]
    Kernel {
        /// Artifact key of the region.
        key: String,
        /// Kernel error.
        #[source]
        source: KernelError,
    },

    /// The kernel output could not be combined with the intensity plane.
    #[error("region {key}: kernel output shape does not match the crop: {source}")]
    Shape {
        /// Artifact key of the region.
        key: String,
        /// Shape error.
        #[source]
        source: ndarray::ShapeError,
    },

    /// The artifact store failed.
    #[error("artifact store: {0}")]
    Store(#[source] StoreError),
}

impl SliceError {
    fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }
}

/// Where feature tensors are persisted.
///
/// Implementations must make `put` atomic at key granularity: after an
/// interruption a key is either fully present or absent.
pub trait ArtifactStore {
    /// Store-specific failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns `true` if an artifact exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns the store error if existence cannot be determined.
    fn contains(&self, key: &str) -> Result<bool, Self::Error>;

    /// Persist `tensor` under `key`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the artifact cannot be written.
    fn put(&self, key: &str, tensor: &FeatureTensor) -> Result<(), Self::Error>;
}

/// Adapts an [`ArtifactStore`] to the [`Presence`] check.
struct Artifacts<'a, S>(&'a S);

impl<S: ArtifactStore> Presence for Artifacts<'_, S> {
    type Key = str;
    type Error = SliceError;

    fn is_present(&self, key: &str) -> Result<bool, SliceError> {
        self.0.contains(key).map_err(SliceError::store)
    }
}

/// Counts from a slicing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSummary {
    /// Regions whose tensor was computed and written.
    pub computed: usize,
    /// Regions skipped because their artifact already existed.
    pub skipped: usize,
}

/// Slice every region of `catalog` out of `image` and persist the
/// kernel output to `store`.
///
/// # Errors
///
/// Stops at the first region whose scaled bounds do not fit, whose crop
/// the kernel rejects, or whose artifact cannot be checked or written.
/// Regions persisted before the failure stay persisted.
pub fn run<K, S>(
    kernel: &K,
    image: &MultiChannelImage,
    catalog: &RegionCatalog,
    store: &S,
    config: &SliceConfig,
) -> Result<SliceSummary, SliceError>
where
    K: FeatureKernel + ?Sized,
    S: ArtifactStore,
{
    let mut scaled = downsample(image.data().view(), config.scale_division);
    if config.minmax && config.order == NormalizationOrder::MinMaxThenPixelNorm {
        minmax_in_place(&mut scaled);
    }
    let (height, width, _) = scaled.dim();
    log::info!(
        "slicing {} regions from {height}x{width} image ({}x downscale)",
        catalog.len(),
        config.scale_division
    );

    let presence = Artifacts(store);
    let mut summary = SliceSummary::default();
    for region in catalog {
        let key = region.key();
        let outcome = compute_if_absent(&presence, key.as_str(), |key| {
            let tensor = slice_region(kernel, scaled.view(), region, key, config)?;
            store.put(key, &tensor).map_err(SliceError::store)?;
            log::info!("wrote {key} {:?}", tensor.dim());
            Ok::<_, SliceError>(())
        })?;
        match outcome {
            Cached::Hit => {
                log::debug!("{key} exists, skipping");
                summary.skipped += 1;
            }
            Cached::Computed(()) => summary.computed += 1,
        }
    }
    Ok(summary)
}

/// Crop, normalize and run the kernel for one region of the downsampled
/// image.
fn slice_region<K>(
    kernel: &K,
    image: ArrayView3<'_, f32>,
    region: &Region,
    key: &str,
    config: &SliceConfig,
) -> Result<FeatureTensor, SliceError>
where
    K: FeatureKernel + ?Sized,
{
    let (height, width, _) = image.dim();
    let bounds = region.bounds.scaled(config.scale_division);
    if !bounds.fits_within(height, width) {
        return Err(SliceError::Bounds {
            key: key.to_owned(),
            bounds,
            height,
            width,
        });
    }

    let mut crop = image
        .slice(s![bounds.y0..bounds.y1, bounds.x0..bounds.x1, ..])
        .to_owned();
    if config.pixel_norm {
        pixel_norm_in_place(&mut crop);
    }
    if config.minmax && config.order == NormalizationOrder::PixelNormThenMinMax {
        minmax_in_place(&mut crop);
    }

    let features = kernel
        .compute(crop.view())
        .map_err(|source| SliceError::Kernel {
            key: key.to_owned(),
            source,
        })?;
    if kernel.is_cross_channel() {
        return Ok(FeatureTensor::from_f32(&features));
    }

    let combined = prepend_intensity(crop.view(), features.view(), kernel.margin()).map_err(
        |source| SliceError::Shape {
            key: key.to_owned(),
            source,
        },
    )?;
    Ok(FeatureTensor::from_f32(&combined))
}

/// Stride rows and columns by `factor`, keeping the first of every
/// `factor` pixels.
#[must_use]
pub fn downsample(data: ArrayView3<'_, f32>, factor: NonZeroUsize) -> Array3<f32> {
    let step = isize::try_from(factor.get()).unwrap_or(isize::MAX);
    data.slice(s![..;step, ..;step, ..]).to_owned()
}

/// Rescale every value to `[0, 1]` by the array's NaN-ignoring min and
/// max. A constant array becomes all zeros; NaN stays NaN.
pub fn minmax_in_place(data: &mut Array3<f32>) {
    let (min, max) = data
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if min > max {
        return;
    }
    let range = max - min;
    if range > 0.0 {
        data.mapv_inplace(|v| (v - min) / range);
    } else {
        data.mapv_inplace(|v| if v.is_nan() { v } else { 0.0 });
    }
}

/// Divide each pixel's channel vector by its own sum. A pixel summing to
/// zero becomes NaN.
pub fn pixel_norm_in_place(data: &mut Array3<f32>) {
    for mut pixel in data.lanes_mut(Axis(2)) {
        let sum = pixel.sum();
        pixel.mapv_inplace(|v| v / sum);
    }
}

/// Crop `margin` pixels from every side of `crop` and stack it in front
/// of `features` as feature 0.
fn prepend_intensity<'a>(
    crop: ArrayView3<'a, f32>,
    features: ArrayView4<'a, f32>,
    margin: usize,
) -> Result<Array4<f32>, ndarray::ShapeError> {
    let (height, width, _) = crop.dim();
    let inner = crop
        .slice_move(s![margin..height - margin, margin..width - margin, ..])
        .insert_axis(Axis(3));
    concatenate(Axis(3), &[inner, features])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use std::convert::Infallible;

    use ndarray::Array4;

    use super::*;
    use crate::channels::from_normalized;

    /// Feature kernel that averages each channel over a window and counts
    /// its invocations.
    struct CountingKernel {
        margin: usize,
        cross: bool,
        calls: Cell<usize>,
    }

    impl CountingKernel {
        fn new(margin: usize) -> Self {
            Self {
                margin,
                cross: false,
                calls: Cell::new(0),
            }
        }
    }

    impl FeatureKernel for CountingKernel {
        fn margin(&self) -> usize {
            self.margin
        }

        fn is_cross_channel(&self) -> bool {
            self.cross
        }

        fn feature_names(&self) -> &[&'static str] {
            &["A", "B"]
        }

        fn compute(&self, crop: ArrayView3<'_, f32>) -> Result<Array4<f32>, KernelError> {
            self.calls.set(self.calls.get() + 1);
            let (h, w, c) = crop.dim();
            let (oh, ow) = crate::kernel::output_size(h, w, self.margin)?;
            Ok(Array4::from_elem((oh, ow, c, 2), 0.5))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        tensors: RefCell<BTreeMap<String, FeatureTensor>>,
    }

    impl ArtifactStore for MemoryStore {
        type Error = Infallible;

        fn contains(&self, key: &str) -> Result<bool, Infallible> {
            Ok(self.tensors.borrow().contains_key(key))
        }

        fn put(&self, key: &str, tensor: &FeatureTensor) -> Result<(), Infallible> {
            self.tensors
                .borrow_mut()
                .insert(key.to_owned(), tensor.clone());
            Ok(())
        }
    }

    fn image(height: usize, width: usize, channels: usize) -> MultiChannelImage {
        let data = Array3::from_shape_fn((height, width, channels), |(y, x, c)| {
            #[allow(clippy::cast_precision_loss)]
            let v = ((y + x + c) % 10) as f32 / 10.0;
            v
        });
        let labels = (0..channels).map(|c| format!("C{c}")).collect();
        from_normalized(data, labels).unwrap()
    }

    fn catalog(regions: &[(&str, Bounds)]) -> RegionCatalog {
        RegionCatalog::from_regions(
            regions
                .iter()
                .enumerate()
                .map(|(row, (name, bounds))| Region {
                    name: (*name).to_owned(),
                    row,
                    bounds: *bounds,
                })
                .collect(),
        )
    }

    #[test]
    fn second_run_computes_nothing() {
        let kernel = CountingKernel::new(2);
        let store = MemoryStore::default();
        let img = image(40, 40, 2);
        let cat = catalog(&[
            ("Tree", Bounds::new(0, 20, 0, 20)),
            ("Tree", Bounds::new(10, 30, 5, 35)),
        ]);
        let config = SliceConfig::default();

        let first = run(&kernel, &img, &cat, &store, &config).unwrap();
        assert_eq!(first, SliceSummary { computed: 2, skipped: 0 });
        let snapshot = store.tensors.borrow().clone();

        let second = run(&kernel, &img, &cat, &store, &config).unwrap();
        assert_eq!(second, SliceSummary { computed: 0, skipped: 2 });
        assert_eq!(kernel.calls.get(), 2);
        assert_eq!(*store.tensors.borrow(), snapshot);
    }

    #[test]
    fn single_mode_prepends_intensity() {
        let kernel = CountingKernel::new(3);
        let store = MemoryStore::default();
        let img = image(30, 30, 3);
        let cat = catalog(&[("Tree", Bounds::new(2, 22, 4, 16))]);
        run(&kernel, &img, &cat, &store, &SliceConfig::default()).unwrap();

        let tensors = store.tensors.borrow();
        let tensor = &tensors["Tree_0"];
        assert_eq!(tensor.dim(), (20 - 6, 12 - 6, 3, 2 + 1));
        // Plane 0 is the crop shifted by the margin.
        let expected = img.data()[[2 + 3, 4 + 3, 1]];
        let stored = tensor.data()[[0, 0, 1, 0]].to_f32();
        assert!((stored - expected).abs() < 1e-3);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn intensity_is_cropped_by_the_margin() {
        let crop = Array3::from_shape_fn((5, 6, 2), |(y, x, c)| {
            #[allow(clippy::cast_precision_loss)]
            let v = (y * 100 + x * 10 + c) as f32;
            v
        });
        let features = Array4::<f32>::zeros((3, 4, 2, 2));
        let combined = prepend_intensity(crop.view(), features.view(), 1).unwrap();
        assert_eq!(combined.dim(), (3, 4, 2, 3));
        assert_eq!(combined[[0, 0, 1, 0]], 111.0);
        assert_eq!(combined[[2, 3, 0, 0]], 340.0);
        assert_eq!(combined[[2, 3, 0, 2]], 0.0);
    }

    #[test]
    fn cross_mode_stores_kernel_output_as_is() {
        let kernel = CountingKernel {
            cross: true,
            ..CountingKernel::new(1)
        };
        let store = MemoryStore::default();
        let img = image(10, 10, 2);
        let cat = catalog(&[("Tree", Bounds::new(0, 10, 0, 10))]);
        run(&kernel, &img, &cat, &store, &SliceConfig::default()).unwrap();
        assert_eq!(store.tensors.borrow()["Tree_0"].dim(), (8, 8, 2, 2));
    }

    #[test]
    fn bounds_are_scaled_with_the_image() {
        let kernel = CountingKernel::new(1);
        let store = MemoryStore::default();
        let img = image(90, 90, 1);
        let cat = catalog(&[("Tree", Bounds::new(30, 60, 9, 21))]);
        let config = SliceConfig {
            scale_division: NonZeroUsize::new(3).unwrap(),
            ..SliceConfig::default()
        };
        run(&kernel, &img, &cat, &store, &config).unwrap();
        // Scaled crop is 10x4; margin 1 leaves 8x2.
        assert_eq!(store.tensors.borrow()["Tree_0"].dim(), (8, 2, 1, 3));
    }

    #[test]
    fn out_of_range_bounds_are_fatal() {
        let kernel = CountingKernel::new(1);
        let store = MemoryStore::default();
        let img = image(20, 20, 1);
        let cat = catalog(&[
            ("Ok", Bounds::new(0, 10, 0, 10)),
            ("Bad", Bounds::new(5, 25, 0, 10)),
        ]);
        let err = run(&kernel, &img, &cat, &store, &SliceConfig::default()).unwrap_err();
        assert!(matches!(err, SliceError::Bounds { ref key, .. } if key == "Bad_1"));
        assert!(store.tensors.borrow().contains_key("Ok_0"));
    }

    #[test]
    fn kernel_failure_is_fatal() {
        let kernel = CountingKernel::new(8);
        let store = MemoryStore::default();
        let img = image(20, 20, 1);
        let cat = catalog(&[("Small", Bounds::new(0, 10, 0, 10))]);
        let err = run(&kernel, &img, &cat, &store, &SliceConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SliceError::Kernel {
                source: KernelError::CropTooSmall { .. },
                ..
            }
        ));
        assert!(store.tensors.borrow().is_empty());
    }

    #[test]
    fn downsample_keeps_every_kth_pixel() {
        let data = Array3::from_shape_fn((7, 5, 1), |(y, x, _)| {
            #[allow(clippy::cast_precision_loss)]
            let v = (y * 10 + x) as f32;
            v
        });
        let out = downsample(data.view(), NonZeroUsize::new(3).unwrap());
        assert_eq!(out.dim(), (3, 2, 1));
        assert_eq!(out[[2, 1, 0]], 63.0);
    }

    #[test]
    fn minmax_ignores_nan_and_flattens_constants() {
        let mut data = Array3::from_shape_vec((1, 4, 1), vec![2.0, f32::NAN, 4.0, 3.0]).unwrap();
        minmax_in_place(&mut data);
        assert_eq!(data[[0, 0, 0]], 0.0);
        assert!(data[[0, 1, 0]].is_nan());
        assert_eq!(data[[0, 2, 0]], 1.0);
        assert_eq!(data[[0, 3, 0]], 0.5);

        let mut flat = Array3::from_elem((2, 2, 2), 0.7);
        minmax_in_place(&mut flat);
        assert!(flat.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn pixel_norm_divides_by_channel_sum() {
        let mut data = Array3::from_shape_vec((1, 2, 2), vec![1.0, 3.0, 0.0, 0.0]).unwrap();
        pixel_norm_in_place(&mut data);
        assert_eq!(data[[0, 0, 0]], 0.25);
        assert_eq!(data[[0, 0, 1]], 0.75);
        assert!(data[[0, 1, 0]].is_nan());
    }

    #[test]
    fn config_parses_from_json() {
        let config: SliceConfig = serde_json::from_str(
            r#"{"scale_division": 4, "minmax": true, "order": "pixel_norm_then_min_max"}"#,
        )
        .unwrap();
        assert_eq!(config.scale_division.get(), 4);
        assert!(config.minmax);
        assert!(!config.pixel_norm);
        assert_eq!(config.order, NormalizationOrder::PixelNormThenMinMax);
        assert!(serde_json::from_str::<SliceConfig>(r#"{"scale_division": 0}"#).is_err());
    }
}

//! Slicing runs over a directory tree.
//!
//! Every directory below the input root that holds a `bounds.csv` is a
//! run: its rasters are loaded with a [`ChannelLoader`], its regions
//! sliced with one [`GlcmKernel`], and the tensors written to a mirror of
//! the run directory below the output root, in a leaf directory named
//! after the configuration.

use std::fs;
use std::path::{Path, PathBuf};

use crownscan_pipeline::bounds::DEFAULT_DELIMITER;
use crownscan_pipeline::{
    BoundsError, GlcmConfig, GlcmKernel, KernelError, RegionCatalog, SliceConfig, SliceError,
    SliceSummary, slice,
};
use serde::{Deserialize, Serialize};

use crate::artifact::NpyStore;
use crate::loader::{ChannelLoader, LoadError};
use crate::remote::RemoteError;
use crate::report::{ReportConfig, ReportError};
use crate::retry::RetryPolicy;
use crate::walk;

/// File name of a run's bounds source.
pub const BOUNDS_FILE: &str = "bounds.csv";

/// Everything configurable about a run, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Downscaling and normalization.
    pub slice: SliceConfig,
    /// Feature kernel parameters.
    pub glcm: GlcmConfig,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
    /// Plot grid names; derived from the kernel and channel table when
    /// absent.
    pub report: Option<ReportConfig>,
    /// Column delimiter of the bounds source.
    pub delimiter: char,
    /// Rescale every pixel's channel vector to its own range on load.
    pub normalize_per_pixel: bool,
    /// Documentation file copied next to written tensors.
    pub info_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            slice: SliceConfig::default(),
            glcm: GlcmConfig::default(),
            retry: RetryPolicy::default(),
            report: None,
            delimiter: DEFAULT_DELIMITER,
            normalize_per_pixel: false,
            info_file: None,
        }
    }
}

impl RunConfig {
    /// Read a configuration file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] or [`RunError::Config`].
    pub fn from_json_file(path: &Path) -> Result<Self, RunError> {
        let text = fs::read_to_string(path).map_err(RunError::io(path))?;
        serde_json::from_str(&text).map_err(|source| RunError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Plot grid names for tensors sliced with this configuration from
    /// channels `channel_labels`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidConfig`] if the kernel parameters are
    /// invalid.
    pub fn report_config(&self, channel_labels: &[String]) -> Result<ReportConfig, KernelError> {
        match &self.report {
            Some(report) => Ok(report.clone()),
            None => Ok(ReportConfig::for_kernel(
                &GlcmKernel::new(self.glcm)?,
                channel_labels,
            )),
        }
    }
}

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A file or directory could not be accessed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is invalid.
    #[error("{}: {source}", path.display())]
    Config {
        /// Configuration path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The bounds source is malformed.
    #[error("{}: {source}", path.display())]
    Bounds {
        /// Bounds source path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: BoundsError,
    },

    /// The kernel configuration is invalid.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// Rasters could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Slicing failed.
    #[error(transparent)]
    Slice(#[from] SliceError),

    /// Report generation failed.
    #[error(transparent)]
    Report(#[from] ReportError),

    /// Remote storage failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl RunError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directories below `input_root` holding a bounds source, sorted.
///
/// # Errors
///
/// Returns [`RunError::Io`] if the tree cannot be walked.
pub fn find_runs(input_root: &Path) -> Result<Vec<PathBuf>, RunError> {
    let files = walk::files_under(input_root).map_err(RunError::io(input_root))?;
    Ok(files
        .iter()
        .filter(|p| p.file_name().is_some_and(|n| n == BOUNDS_FILE))
        .filter_map(|p| p.parent().map(Path::to_path_buf))
        .collect())
}

/// Leaf directory name describing how tensors were produced, e.g.
/// `minmax_4rad_1step_128bins_2xDownScale`.
#[must_use]
pub fn output_leaf(slice: &SliceConfig, glcm: &GlcmConfig) -> String {
    let mut leaf = String::new();
    if slice.minmax {
        leaf.push_str("minmax_");
    }
    if slice.pixel_norm {
        leaf.push_str("pixnorm_");
    }
    let (radius, bins, scale) = (glcm.radius, glcm.bin_to, slice.scale_division);
    if glcm.cross {
        leaf.push_str(&format!("{radius}rad_{bins}bins_{scale}xDownScale_all_combos"));
    } else {
        let step = glcm.step_size;
        leaf.push_str(&format!("{radius}rad_{step}step_{bins}bins_{scale}xDownScale"));
    }
    leaf
}

/// Output directory of `run_dir`: its path relative to `input_root`,
/// under `output_root`, plus [`output_leaf`].
#[must_use]
pub fn output_dir(
    input_root: &Path,
    run_dir: &Path,
    output_root: &Path,
    config: &RunConfig,
) -> PathBuf {
    let relative = run_dir.strip_prefix(input_root).unwrap_or(run_dir);
    output_root
        .join(relative)
        .join(output_leaf(&config.slice, &config.glcm))
}

/// Regions of `run_dir`'s bounds source; none if it has no bounds
/// source.
///
/// # Errors
///
/// Returns [`RunError::Bounds`] if the bounds source is malformed.
pub fn read_catalog(run_dir: &Path, delimiter: char) -> Result<RegionCatalog, RunError> {
    let path = run_dir.join(BOUNDS_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{} not found, no regions to slice", path.display());
            return Ok(RegionCatalog::empty());
        }
        Err(err) => return Err(RunError::io(&path)(err)),
    };
    RegionCatalog::parse(&text, delimiter).map_err(|source| RunError::Bounds { path, source })
}

/// Slice one run directory into `out_dir`.
///
/// # Errors
///
/// Returns a [`RunError`] for malformed bounds, unloadable rasters, or
/// any slicing failure.
pub fn slice_run(
    loader: &ChannelLoader,
    kernel: &GlcmKernel,
    run_dir: &Path,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<SliceSummary, RunError> {
    let catalog = read_catalog(run_dir, config.delimiter)?;
    if catalog.is_empty() {
        return Ok(SliceSummary::default());
    }
    let paths = loader.image_paths(run_dir)?;
    let image = loader.load(&paths, config.normalize_per_pixel)?;

    let mut store = NpyStore::new(out_dir);
    if let Some(info) = &config.info_file {
        store = store.with_info_file(info);
    }
    log::info!("slicing {} into {}", run_dir.display(), out_dir.display());
    Ok(slice::run(kernel, &image, &catalog, &store, &config.slice)?)
}

/// Slice every run below `input_root` into `output_root`.
///
/// # Errors
///
/// Stops at the first failing run.
pub fn slice_all(
    loader: &ChannelLoader,
    input_root: &Path,
    output_root: &Path,
    config: &RunConfig,
) -> Result<SliceSummary, RunError> {
    let kernel = GlcmKernel::new(config.glcm)?;
    let runs = find_runs(input_root)?;
    log::info!("found {} runs below {}", runs.len(), input_root.display());

    let mut total = SliceSummary::default();
    for run_dir in &runs {
        let out_dir = output_dir(input_root, run_dir, output_root, config);
        let summary = slice_run(loader, &kernel, run_dir, &out_dir, config)?;
        log::info!(
            "{}: {} computed, {} skipped",
            run_dir.display(),
            summary.computed,
            summary.skipped
        );
        total.computed += summary.computed;
        total.skipped += summary.skipped;
    }
    Ok(total)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    #[test]
    fn leaf_names_describe_configuration() {
        let mut config = RunConfig::default();
        assert_eq!(
            output_leaf(&config.slice, &config.glcm),
            "4rad_1step_128bins_1xDownScale"
        );

        config.slice.minmax = true;
        config.slice.pixel_norm = true;
        config.slice.scale_division = NonZeroUsize::new(3).unwrap();
        config.glcm.radius = 2;
        config.glcm.step_size = 2;
        config.glcm.bin_to = 64;
        assert_eq!(
            output_leaf(&config.slice, &config.glcm),
            "minmax_pixnorm_2rad_2step_64bins_3xDownScale"
        );

        config.glcm.cross = true;
        assert_eq!(
            output_leaf(&config.slice, &config.glcm),
            "minmax_pixnorm_2rad_64bins_3xDownScale_all_combos"
        );
    }

    #[test]
    fn output_mirrors_input_tree() {
        let config = RunConfig::default();
        assert_eq!(
            output_dir(
                Path::new("/in"),
                Path::new("/in/site/2021"),
                Path::new("/out"),
                &config
            ),
            Path::new("/out/site/2021/4rad_1step_128bins_1xDownScale")
        );
    }

    #[test]
    fn runs_are_directories_with_bounds() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["a/bounds.csv", "b/c/bounds.csv", "d/result.tif"] {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        assert_eq!(
            find_runs(dir.path()).unwrap(),
            [dir.path().join("a"), dir.path().join("b/c")]
        );
    }

    #[test]
    fn missing_bounds_means_no_regions() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_catalog(dir.path(), '|').unwrap().is_empty());

        fs::write(dir.path().join(BOUNDS_FILE), "name|y0|y1|x0\nA|0|1|0\n").unwrap();
        assert!(matches!(
            read_catalog(dir.path(), '|'),
            Err(RunError::Bounds { .. })
        ));
    }

    #[test]
    fn config_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"slice": {"scale_division": 2, "minmax": true}, "glcm": {"radius": 3}}"#,
        )
        .unwrap();
        let config = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(config.slice.scale_division.get(), 2);
        assert!(config.slice.minmax);
        assert_eq!(config.glcm.radius, 3);
        assert_eq!(config.glcm.bin_to, GlcmConfig::DEFAULT_BIN_TO);
        assert_eq!(config.delimiter, '|');
        assert_eq!(config.retry, RetryPolicy::default());

        fs::write(&path, r#"{"slice": {"scale_division": 0}}"#).unwrap();
        assert!(matches!(
            RunConfig::from_json_file(&path),
            Err(RunError::Config { .. })
        ));
    }

    #[test]
    fn report_names_follow_kernel_mode() {
        let labels = vec!["R".to_owned(), "G".to_owned()];
        let mut config = RunConfig::default();
        let single = config.report_config(&labels).unwrap();
        assert_eq!(single.channels, labels);
        assert_eq!(single.features[0], "INTENSITY");

        config.glcm.cross = true;
        let cross = config.report_config(&labels).unwrap();
        assert_eq!(cross.channels, ["('R', 'G')"]);
    }
}

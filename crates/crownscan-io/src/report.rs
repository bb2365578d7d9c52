//! Writing report plots for sets of feature tensors.
//!
//! A set is a directory of `{stem}.npy` artifacts. Each artifact gets an
//! image grid and a histogram grid next to it; the set gets one stacked
//! histogram. A plot that exists locally, or remotely when a
//! [`RemoteStore`] is attached, is never redrawn, and a region whose
//! plots all exist is not even loaded.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crownscan_pipeline::{
    Cached, ChannelTable, FeatureKernel, FeatureTensor, INTENSITY, Presence, compute_if_absent,
    glcm, stored_feature_names,
};
use crownscan_report::{Figure, GridLabels, PlotKind, tree_name};
use serde::{Deserialize, Serialize};

use crate::artifact::{ARTIFACT_EXTENSION, load_tensor, write_atomic};
use crate::remote::{RemoteError, RemoteStore};
use crate::walk;

/// Row and column names of every plot grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// One name per tensor plane (channel, or channel pair).
    pub channels: Vec<String>,
    /// One name per tensor feature.
    pub features: Vec<String>,
}

impl Default for ReportConfig {
    /// Names for single-channel GLCM tensors of the default channel
    /// table.
    fn default() -> Self {
        Self {
            channels: ChannelTable::default().labels(),
            features: std::iter::once(INTENSITY)
                .chain(glcm::FEATURES)
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl ReportConfig {
    /// Names matching the tensors `kernel` produces from channels
    /// `channel_labels`.
    #[must_use]
    pub fn for_kernel<K: FeatureKernel + ?Sized>(kernel: &K, channel_labels: &[String]) -> Self {
        Self {
            channels: kernel.plane_labels(channel_labels),
            features: stored_feature_names(kernel),
        }
    }

    fn grid_labels(&self) -> GridLabels {
        GridLabels::new(self.channels.clone(), self.features.clone())
    }
}

/// Fatal report errors. Per-region problems are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// A set directory could not be listed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Checking remote plot existence failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Counts from a report run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Regions whose tensor was loaded and drawn.
    pub plotted: usize,
    /// Regions with every plot already present.
    pub skipped: usize,
    /// Regions skipped because the tensor was unreadable or mis-shaped.
    pub failed: usize,
    /// Plot files written.
    pub written: usize,
}

impl std::ops::AddAssign for ReportSummary {
    fn add_assign(&mut self, other: Self) {
        self.plotted += other.plotted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.written += other.written;
    }
}

/// Plot existence: a local file, or the remote object mirroring it.
#[derive(Debug, Clone, Copy)]
struct Plots<'a> {
    remote: Option<&'a RemoteStore>,
}

impl Presence for Plots<'_> {
    type Key = Path;
    type Error = RemoteError;

    fn is_present(&self, path: &Path) -> Result<bool, RemoteError> {
        if path.is_file() {
            return Ok(true);
        }
        match self.remote {
            Some(remote) => remote.exists(path),
            None => Ok(false),
        }
    }
}

/// A region counts as done when both per-region plots exist and the
/// set's stacked histogram does not need its data.
struct RegionPlots<'a> {
    plots: Plots<'a>,
    stacked_pending: bool,
}

impl Presence for RegionPlots<'_> {
    type Key = Path;
    type Error = RemoteError;

    fn is_present(&self, tensor: &Path) -> Result<bool, RemoteError> {
        if self.stacked_pending {
            return Ok(false);
        }
        for kind in [PlotKind::ImageGrid, PlotKind::HistogramGrid] {
            if !self.plots.is_present(&plot_path(tensor, kind))? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Path of `kind`'s plot for the region stored at `tensor`.
#[must_use]
pub fn plot_path(tensor: &Path, kind: PlotKind) -> PathBuf {
    tensor.with_file_name(kind.file_name(&stem(tensor)))
}

/// Path of a set's stacked histogram.
#[must_use]
pub fn stacked_path(set: &Path) -> PathBuf {
    set.join(PlotKind::StackedHistogram.file_name(""))
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Draws and writes report plots.
#[derive(Debug, Clone)]
pub struct Reporter<'a> {
    labels: GridLabels,
    plots: Plots<'a>,
}

impl<'a> Reporter<'a> {
    /// A reporter naming grids from `config`, consulting `remote` for
    /// plots that were already uploaded.
    #[must_use]
    pub fn new(config: &ReportConfig, remote: Option<&'a RemoteStore>) -> Self {
        Self {
            labels: config.grid_labels(),
            plots: Plots { remote },
        }
    }

    /// Report every set below `root`, i.e. every directory holding at
    /// least one tensor.
    ///
    /// # Errors
    ///
    /// See [`Self::report_set`].
    pub fn report_all(&self, root: &Path) -> Result<ReportSummary, ReportError> {
        let tensors = walk::files_with_extension(root, ARTIFACT_EXTENSION).map_err(|source| {
            ReportError::Io {
                path: root.to_path_buf(),
                source,
            }
        })?;
        let sets: BTreeSet<&Path> = tensors.iter().filter_map(|p| p.parent()).collect();
        let mut summary = ReportSummary::default();
        for set in sets {
            summary += self.report_set(set)?;
        }
        Ok(summary)
    }

    /// Draw the missing plots of one set.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Io`] if the set cannot be listed and
    /// [`ReportError::Remote`] if remote existence checks fail. Unreadable
    /// tensors and plot write failures are logged and skipped.
    pub fn report_set(&self, set: &Path) -> Result<ReportSummary, ReportError> {
        let tensors: Vec<PathBuf> = walk::files_with_extension(set, ARTIFACT_EXTENSION)
            .map_err(|source| ReportError::Io {
                path: set.to_path_buf(),
                source,
            })?
            .into_iter()
            .filter(|p| p.parent() == Some(set))
            .collect();

        let stacked_file = stacked_path(set);
        let stacked_pending = !self.plots.is_present(&stacked_file)?;
        let mut stacked = Figure::new(PlotKind::StackedHistogram, self.labels.clone());
        let regions = RegionPlots {
            plots: self.plots,
            stacked_pending,
        };
        log::info!("reporting {} ({} tensors)", set.display(), tensors.len());

        let mut summary = ReportSummary::default();
        for tensor in &tensors {
            let outcome = compute_if_absent(&regions, tensor.as_path(), |path| {
                self.report_region(path, stacked_pending.then_some(&mut stacked))
            })?;
            match outcome {
                Cached::Hit => {
                    log::debug!("{}: all plots exist", tensor.display());
                    summary.skipped += 1;
                }
                Cached::Computed(None) => summary.failed += 1,
                Cached::Computed(Some(written)) => {
                    summary.plotted += 1;
                    summary.written += written;
                }
            }
        }

        if stacked_pending && let Some(document) = stacked.render() {
            summary.written += usize::from(write_plot(&stacked_file, &document));
        }
        Ok(summary)
    }

    /// Draw one region. Returns the number of plots written, or `None` if
    /// the tensor could not be used.
    fn report_region(
        &self,
        path: &Path,
        stacked: Option<&mut Figure>,
    ) -> Result<Option<usize>, ReportError> {
        let tensor = match load_tensor(path) {
            Ok(tensor) => tensor,
            Err(err) => {
                log::warn!("skipping unreadable tensor: {err}");
                return Ok(None);
            }
        };
        if !self.fits(&tensor) {
            log::warn!(
                "skipping {}: {} planes x {} features, expected {} x {}",
                path.display(),
                tensor.planes(),
                tensor.features(),
                self.labels.rows.len(),
                self.labels.columns.len()
            );
            return Ok(None);
        }

        let stem = stem(path);
        let name = tree_name(&stem);
        let mut written = 0;
        for kind in [PlotKind::HistogramGrid, PlotKind::ImageGrid] {
            let target = plot_path(path, kind);
            let outcome = compute_if_absent(&self.plots, target.as_path(), |target| {
                Ok::<_, RemoteError>(self.draw(kind, &tensor, name).is_some_and(|doc| write_plot(target, &doc)))
            })?;
            written += usize::from(outcome.computed().unwrap_or(false));
        }
        if let Some(stacked) = stacked
            && let Err(err) = stacked.plot_tensor(&tensor, name)
        {
            log::warn!("{}: stacked histogram: {err}", path.display());
        }
        Ok(Some(written))
    }

    fn fits(&self, tensor: &FeatureTensor) -> bool {
        tensor.planes() == self.labels.rows.len() && tensor.features() == self.labels.columns.len()
    }

    fn draw(&self, kind: PlotKind, tensor: &FeatureTensor, name: &str) -> Option<String> {
        let mut figure = Figure::new(kind, self.labels.clone());
        if let Err(err) = figure.plot_tensor(tensor, name) {
            log::warn!("{name}: {} failed: {err}", kind.title());
            return None;
        }
        figure.render()
    }
}

/// Write a rendered plot, logging instead of failing.
fn write_plot(path: &Path, document: &str) -> bool {
    match write_atomic(path, |w| w.write_all(document.as_bytes())) {
        Ok(()) => {
            log::debug!("wrote {}", path.display());
            true
        }
        Err(err) => {
            log::warn!("failed to write {}: {err}", path.display());
            false
        }
    }
}

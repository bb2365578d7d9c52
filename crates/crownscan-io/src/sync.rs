//! Building reports for sets that live remotely.

use std::path::Path;

use crate::artifact::ARTIFACT_EXTENSION;
use crate::remote::RemoteStore;
use crate::report::{Reporter, stacked_path};
use crate::run::RunError;
use crate::walk;

/// Counts from [`remote_report`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Sets reported and uploaded.
    pub reported: usize,
    /// Sets that already had a stacked histogram.
    pub skipped: usize,
    /// Tensors fetched.
    pub downloaded: usize,
    /// Files uploaded.
    pub uploaded: usize,
}

/// Report every remote set below `prefix` that has no stacked histogram
/// yet: fetch its missing tensors, draw its plots locally, then upload
/// the set directory and remove the local copies.
///
/// # Errors
///
/// Stops at the first set whose transfer or listing fails.
pub fn remote_report(
    remote: &RemoteStore,
    reporter: &Reporter<'_>,
    prefix: &Path,
) -> Result<SyncSummary, RunError> {
    let sets = remote.list_sets(prefix, &[ARTIFACT_EXTENSION, "svg"])?;
    log::info!("{} remote sets below {}", sets.len(), prefix.display());

    let mut summary = SyncSummary::default();
    for (set, files) in &sets {
        let stacked = stacked_path(set);
        if files.contains(&stacked) {
            log::debug!("{}: report exists", set.display());
            summary.skipped += 1;
            continue;
        }
        for tensor in files.iter().filter(|p| walk::has_extension(p, ARTIFACT_EXTENSION)) {
            if !tensor.is_file() && remote.download(tensor)? {
                summary.downloaded += 1;
            }
        }
        reporter.report_set(set)?;
        summary.uploaded += remote.upload_dir(set, true)?.uploaded;
        summary.reported += 1;
    }
    Ok(summary)
}

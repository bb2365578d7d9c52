//! On-disk feature tensor store.
//!
//! One NPY file per region, `{key}.npy`, in a single output directory.
//! Writes go to a temporary file in the same directory and are renamed
//! into place, so an interrupted run never leaves a partial artifact
//! that a later run would mistake for a finished one.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crownscan_pipeline::{ArtifactStore, FeatureTensor};
use tempfile::NamedTempFile;

use crate::npy::{self, NpyError};

/// File extension of feature tensor artifacts.
pub const ARTIFACT_EXTENSION: &str = "npy";

/// Errors from reading or writing artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// A filesystem operation failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be decoded.
    #[error("{}: {source}", path.display())]
    Npy {
        /// Artifact path.
        path: PathBuf,
        /// Decoding error.
        #[source]
        source: NpyError,
    },
}

impl ArtifactError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory of NPY feature tensors.
#[derive(Debug, Clone)]
pub struct NpyStore {
    dir: PathBuf,
    info_file: Option<PathBuf>,
}

impl NpyStore {
    /// A store writing into `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            info_file: None,
        }
    }

    /// Copy `info_file` into the directory after every artifact write, so
    /// the output always carries a description of its contents.
    #[must_use]
    pub fn with_info_file(mut self, info_file: impl Into<PathBuf>) -> Self {
        self.info_file = Some(info_file.into());
        self
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for `key`.
    #[must_use]
    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ARTIFACT_EXTENSION}"))
    }

    fn copy_info_file(&self) -> Result<(), ArtifactError> {
        let Some(info) = &self.info_file else {
            return Ok(());
        };
        let Some(name) = info.file_name() else {
            return Ok(());
        };
        fs::copy(info, self.dir.join(name)).map_err(ArtifactError::io(info))?;
        Ok(())
    }
}

impl ArtifactStore for NpyStore {
    type Error = ArtifactError;

    fn contains(&self, key: &str) -> Result<bool, ArtifactError> {
        let path = self.path(key);
        path.try_exists().map_err(ArtifactError::io(&path))
    }

    fn put(&self, key: &str, tensor: &FeatureTensor) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(ArtifactError::io(&self.dir))?;
        let path = self.path(key);
        write_atomic(&path, |writer| npy::write_tensor(writer, tensor))
            .map_err(ArtifactError::io(&path))?;
        self.copy_info_file()
    }
}

/// Write a file by streaming into a sibling temporary file and renaming
/// it over `path` once complete.
///
/// The parent directory must exist.
///
/// # Errors
///
/// Returns any error from creating, writing or renaming the temporary
/// file.
pub fn write_atomic<F>(path: &Path, write: F) -> std::io::Result<()>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(&mut tmp);
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Load the tensor stored at `path`.
///
/// # Errors
///
/// Returns [`ArtifactError`] if the file cannot be opened or decoded.
pub fn load_tensor(path: &Path) -> Result<FeatureTensor, ArtifactError> {
    let file = File::open(path).map_err(ArtifactError::io(path))?;
    npy::read_tensor(BufReader::new(file)).map_err(|source| ArtifactError::Npy {
        path: path.to_path_buf(),
        source,
    })
}

//! Remote object storage mirrored onto a local data root.
//!
//! Objects are addressed by POSIX-style keys equal to a local path
//! relative to the data root, so `data/site/set/Ficus_0.npy` with data
//! root `data` is the object `site/set/Ficus_0.npy`. [`RemoteStore`]
//! wraps a [`BlobStore`] backend with that mapping, the upload-once rule
//! and retry.
//!
//! There is no transaction between an existence check and the following
//! write; two runs racing on one key may both transfer it.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crownscan_pipeline::{Cached, Presence, compute_if_absent};

use crate::artifact::{ARTIFACT_EXTENSION, write_atomic};
use crate::retry::{Attempted, RetryPolicy, Transient};
use crate::walk;

/// Boxed backend failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Extensions uploaded by [`RemoteStore::upload_dir`], in upload order.
/// Tensors go last so a set with its tensors remote also has its plots.
pub const UPLOAD_ORDER: [&str; 3] = ["svg", "md", ARTIFACT_EXTENSION];

/// Failure reported by a [`BlobStore`].
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No object exists at the key.
    #[error("object not found")]
    NotFound,

    /// A failure that may clear up on retry (timeouts, throttling).
    #[error("transient failure: {0}")]
    Transient(#[source] BoxError),

    /// A failure that will not clear up on retry.
    #[error("{0}")]
    Permanent(#[source] BoxError),
}

impl Transient for BlobError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<io::Error> for BlobError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::Transient(Box::new(err)),
            _ => Self::Permanent(Box::new(err)),
        }
    }
}

/// Minimal object store interface.
pub trait BlobStore {
    /// Returns `true` if an object exists at `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`BlobError`] if the backend cannot be queried.
    fn exists(&self, key: &str) -> Result<bool, BlobError>;

    /// Fetch the object at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if there is no such object.
    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Store `data` at `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns a [`BlobError`] if the write fails.
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError>;

    /// Every key starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns a [`BlobError`] if the backend cannot be listed.
    fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;
}

/// A [`BlobStore`] backed by a directory, e.g. a mounted bucket or
/// network share.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    /// Store objects under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        if key.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(BlobError::Permanent(format!("invalid object key {key:?}").into()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for DirBlobStore {
    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.object_path(key)?.try_exists()?)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        Ok(fs::read(self.object_path(key)?)?)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, |w| io::Write::write_all(w, data))?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        if !self.root.try_exists()? {
            return Ok(Vec::new());
        }
        let mut keys: Vec<String> = walk::files_under(&self.root)?
            .iter()
            .filter_map(|p| p.strip_prefix(&self.root).ok())
            .map(posix_key)
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Errors from [`RemoteStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// A local path is not inside the data root.
    #[error("{} is not under the data root {}", path.display(), root.display())]
    NotUnderRoot {
        /// Offending path.
        path: PathBuf,
        /// Configured data root.
        root: PathBuf,
    },

    /// A local file operation failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Local path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The backend failed, after retrying where that made sense.
    #[error("remote object {key}: {source} (after {attempts} attempt(s))")]
    Backend {
        /// Object key.
        key: String,
        /// Attempts made.
        attempts: u32,
        /// Last backend error.
        #[source]
        source: BlobError,
    },
}

impl RemoteError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Counts from [`RemoteStore::upload_dir`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Files transferred.
    pub uploaded: usize,
    /// Files already present remotely.
    pub skipped: usize,
}

/// Handle to the remote mirror of a local data root.
pub struct RemoteStore {
    backend: Box<dyn BlobStore>,
    data_root: PathBuf,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("data_root", &self.data_root)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RemoteStore {
    /// Mirror `data_root` onto `backend` with the default retry policy.
    pub fn new(backend: impl BlobStore + 'static, data_root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Box::new(backend),
            data_root: data_root.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Local data root.
    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Object key of a local path.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotUnderRoot`] if `path` is outside the data
    /// root.
    pub fn key_for(&self, path: &Path) -> Result<String, RemoteError> {
        path.strip_prefix(&self.data_root)
            .ok()
            .filter(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))))
            .map(posix_key)
            .ok_or_else(|| RemoteError::NotUnderRoot {
                path: path.to_path_buf(),
                root: self.data_root.clone(),
            })
    }

    /// Local path of an object key.
    #[must_use]
    pub fn local_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.data_root.clone(), |p, part| p.join(part))
    }

    fn call<T>(
        &self,
        what: &str,
        key: &str,
        mut op: impl FnMut(&dyn BlobStore) -> Result<T, BlobError>,
    ) -> Result<T, RemoteError> {
        self.retry
            .run(&format!("{what} {key}"), || op(self.backend.as_ref()))
            .map_err(|Attempted { attempts, error }| RemoteError::Backend {
                key: key.to_owned(),
                attempts,
                source: error,
            })
    }

    /// Returns `true` if the remote holds the object for `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] if `path` is outside the data root or the
    /// backend keeps failing.
    pub fn exists(&self, path: &Path) -> Result<bool, RemoteError> {
        let key = self.key_for(path)?;
        self.call("exists", &key, |b| b.exists(&key))
    }

    /// Transfer `path` unless the remote already holds it, then remove the
    /// local copy if `delete` is set. A local copy that is already gone is
    /// not an error when the remote holds the object.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] if the local file cannot be read or
    /// removed, or the backend keeps failing.
    pub fn upload(&self, path: &Path, delete: bool) -> Result<Cached<()>, RemoteError> {
        let outcome = compute_if_absent(self, path, |path| {
            let key = self.key_for(path)?;
            let data = fs::read(path).map_err(RemoteError::io(path))?;
            self.call("put", &key, |b| b.put(&key, &data))?;
            log::info!("uploaded {key} ({} bytes)", data.len());
            Ok::<_, RemoteError>(())
        })?;
        if outcome.is_hit() {
            log::debug!("{} already remote", path.display());
        }
        if delete {
            match fs::remove_file(path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    return Err(RemoteError::io(path)(err));
                }
                _ => {}
            }
        }
        Ok(outcome)
    }

    /// Fetch the object for `path` into `path`, creating parent
    /// directories. Returns `false` (after logging a warning) when the
    /// remote has no such object.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] if the backend keeps failing or the local
    /// file cannot be written.
    pub fn download(&self, path: &Path) -> Result<bool, RemoteError> {
        let key = self.key_for(path)?;
        if !self.call("exists", &key, |b| b.exists(&key))? {
            log::warn!("remote has no object {key}");
            return Ok(false);
        }
        let data = self.call("get", &key, |b| b.get(&key))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(RemoteError::io(parent))?;
        }
        write_atomic(path, |w| io::Write::write_all(w, &data)).map_err(RemoteError::io(path))?;
        log::info!("downloaded {key}");
        Ok(true)
    }

    /// Remote sets below local directory `prefix`.
    ///
    /// A set is the parent directory of any `.npy` object. Each set maps
    /// to the local paths of its objects whose extension is one of
    /// `extensions` (objects in nested directories belong to the nearer
    /// set only if that is itself a set).
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] if `prefix` is outside the data root or
    /// listing keeps failing.
    pub fn list_sets(
        &self,
        prefix: &Path,
        extensions: &[&str],
    ) -> Result<BTreeMap<PathBuf, Vec<PathBuf>>, RemoteError> {
        let key_prefix = if prefix == self.data_root {
            String::new()
        } else {
            let mut key = self.key_for(prefix)?;
            key.push('/');
            key
        };
        let keys = self.call("list", &key_prefix, |b| b.list(&key_prefix))?;

        let mut sets: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for key in &keys {
            let path = self.local_path(key);
            if walk::has_extension(&path, ARTIFACT_EXTENSION)
                && let Some(parent) = path.parent()
            {
                sets.entry(parent.to_path_buf()).or_default();
            }
        }
        for key in &keys {
            let path = self.local_path(key);
            if !extensions.iter().any(|e| walk::has_extension(&path, e)) {
                continue;
            }
            if let Some(members) = path.parent().and_then(|p| sets.get_mut(p)) {
                members.push(path);
            }
        }
        Ok(sets)
    }

    /// Upload every `svg`, `md` and `npy` file below `dir`, in that
    /// extension order.
    ///
    /// # Errors
    ///
    /// Stops at the first file that fails to upload.
    pub fn upload_dir(&self, dir: &Path, delete: bool) -> Result<UploadSummary, RemoteError> {
        let files = walk::files_under(dir).map_err(RemoteError::io(dir))?;
        let mut summary = UploadSummary::default();
        for extension in UPLOAD_ORDER {
            for path in files.iter().filter(|p| walk::has_extension(p, extension)) {
                match self.upload(path, delete)? {
                    Cached::Hit => summary.skipped += 1,
                    Cached::Computed(()) => summary.uploaded += 1,
                }
            }
        }
        log::info!(
            "{}: {} uploaded, {} already remote",
            dir.display(),
            summary.uploaded,
            summary.skipped
        );
        Ok(summary)
    }
}

impl Presence for RemoteStore {
    type Key = Path;
    type Error = RemoteError;

    fn is_present(&self, path: &Path) -> Result<bool, RemoteError> {
        self.exists(path)
    }
}

fn posix_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

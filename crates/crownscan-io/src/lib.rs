//! crownscan-io: files, rasters and remote storage for crownscan.
//!
//! Decodes source rasters into the channel stacks `crownscan-pipeline`
//! slices, stores feature tensors as NPY files, writes the SVG plots
//! `crownscan-report` renders, and mirrors output directories to a
//! remote object store.

pub mod artifact;
pub mod loader;
pub mod npy;
pub mod raster;
pub mod remote;
pub mod report;
pub mod retry;
pub mod run;
pub mod sync;
pub mod walk;

pub use artifact::{ArtifactError, NpyStore, load_tensor};
pub use loader::{ChannelLoader, LoadError};
pub use remote::{BlobError, BlobStore, DirBlobStore, RemoteError, RemoteStore, UploadSummary};
pub use report::{ReportConfig, ReportError, ReportSummary, Reporter};
pub use retry::RetryPolicy;
pub use run::{RunConfig, RunError, slice_all};
pub use sync::{SyncSummary, remote_report};

//! crownscan: command-line front end.
//!
//! ```text
//! crownscan slice <INPUT_ROOT> <OUTPUT_ROOT> [--minmax] [--scale-division 2] ...
//! crownscan report <ROOT>
//! crownscan upload --data-root <DIR> --bucket <DIR> <PATH>...
//! crownscan download --data-root <DIR> --bucket <DIR> <PATH>...
//! crownscan remote-report --data-root <DIR> --bucket <DIR> [PREFIX]
//! ```
//!
//! Settings come from `--config <json>` (a serialized `RunConfig`);
//! individual flags override it. Logging goes to stderr at
//! `--log-level`, or per `RUST_LOG` when set.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::error::Error as _;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use crownscan_io::run::{self, RunConfig, RunError};
use crownscan_io::{ChannelLoader, DirBlobStore, RemoteStore, Reporter, remote_report};
use crownscan_pipeline::NormalizationOrder;

/// Cached GLCM texture features for multispectral tree-crown imagery.
#[derive(Parser)]
#[command(name = "crownscan", version)]
struct Cli {
    /// Run configuration as a JSON file; missing keys take defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Channel descriptor table as a JSON file, replacing the built-in
    /// table for the six multispectral exports.
    #[arg(long, global = true)]
    channels: Option<PathBuf>,

    /// Log level or filter spec, used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Slice every run (directory with a bounds.csv) below INPUT_ROOT.
    Slice(SliceArgs),
    /// Draw missing plots for every set below ROOT.
    Report {
        /// Directory holding sets of feature tensors.
        root: PathBuf,
        /// Count plots already in this remote store as existing.
        #[arg(long, requires = "bucket")]
        data_root: Option<PathBuf>,
        /// Directory backing the remote store.
        #[arg(long, requires = "data_root")]
        bucket: Option<PathBuf>,
    },
    /// Upload files to the remote store, removing local copies.
    Upload {
        #[command(flatten)]
        remote: RemoteArgs,
        /// Keep local copies after uploading.
        #[arg(long)]
        keep: bool,
        /// Files or directories under the data root.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Fetch files from the remote store into the data root.
    Download {
        #[command(flatten)]
        remote: RemoteArgs,
        /// Files under the data root.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Report remote sets that have no stacked histogram yet.
    RemoteReport {
        #[command(flatten)]
        remote: RemoteArgs,
        /// Only sets below this directory (defaults to the data root).
        prefix: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SliceArgs {
    /// Directory searched for runs.
    input_root: PathBuf,
    /// Directory receiving one tensor directory per run.
    output_root: PathBuf,
    /// Keep every Nth row and column.
    #[arg(long)]
    scale_division: Option<NonZeroUsize>,
    /// Rescale values to [0, 1] by their min and max.
    #[arg(long)]
    minmax: bool,
    /// Divide each pixel by its channel sum.
    #[arg(long)]
    pixel_norm: bool,
    /// Apply per-pixel normalization before min-max scaling.
    #[arg(long)]
    pixel_norm_first: bool,
    /// Pair channels with each other instead of with shifted windows.
    #[arg(long)]
    cross: bool,
    /// GLCM window radius.
    #[arg(long)]
    radius: Option<usize>,
    /// GLCM pairing distance.
    #[arg(long)]
    step_size: Option<usize>,
    /// GLCM grey levels.
    #[arg(long)]
    bins: Option<u16>,
    /// File copied into every output directory.
    #[arg(long)]
    info: Option<PathBuf>,
}

#[derive(Args)]
struct RemoteArgs {
    /// Local directory mirrored by the remote store.
    #[arg(long)]
    data_root: PathBuf,
    /// Directory backing the remote store (e.g. a mounted bucket).
    #[arg(long)]
    bucket: PathBuf,
}

impl RemoteArgs {
    fn open(&self, config: &RunConfig) -> RemoteStore {
        open_remote(&self.bucket, &self.data_root, config)
    }
}

fn open_remote(bucket: &Path, data_root: &Path, config: &RunConfig) -> RemoteStore {
    RemoteStore::new(DirBlobStore::new(bucket), data_root).with_retry(config.retry)
}

fn apply_slice_flags(config: &mut RunConfig, args: &SliceArgs) {
    if let Some(k) = args.scale_division {
        config.slice.scale_division = k;
    }
    config.slice.minmax |= args.minmax;
    config.slice.pixel_norm |= args.pixel_norm;
    if args.pixel_norm_first {
        config.slice.order = NormalizationOrder::PixelNormThenMinMax;
    }
    config.glcm.cross |= args.cross;
    if let Some(radius) = args.radius {
        config.glcm.radius = radius;
    }
    if let Some(step) = args.step_size {
        config.glcm.step_size = step;
    }
    if let Some(bins) = args.bins {
        config.glcm.bin_to = bins;
    }
    if let Some(info) = &args.info {
        config.info_file = Some(info.clone());
    }
}

fn reporter<'a>(
    config: &RunConfig,
    loader: &ChannelLoader,
    remote: Option<&'a RemoteStore>,
) -> Result<Reporter<'a>, RunError> {
    let report = config.report_config(&loader.table().labels())?;
    Ok(Reporter::new(&report, remote))
}

fn upload(remote: &RemoteStore, path: &Path, delete: bool) -> Result<(), RunError> {
    if path.is_dir() {
        let summary = remote.upload_dir(path, delete)?;
        println!("{}: {} uploaded, {} already remote", path.display(), summary.uploaded, summary.skipped);
    } else if remote.upload(path, delete)?.is_hit() {
        println!("{}: already remote", path.display());
    } else {
        println!("{}: uploaded", path.display());
    }
    Ok(())
}

fn execute(cli: Cli) -> Result<(), RunError> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    let loader = match &cli.channels {
        Some(path) => ChannelLoader::from_json_file(path)?,
        None => ChannelLoader::default(),
    };

    match cli.command {
        Command::Slice(args) => {
            apply_slice_flags(&mut config, &args);
            let summary = run::slice_all(&loader, &args.input_root, &args.output_root, &config)?;
            println!("{} computed, {} skipped", summary.computed, summary.skipped);
        }
        Command::Report {
            root,
            data_root,
            bucket,
        } => {
            let remote = data_root
                .zip(bucket)
                .map(|(data_root, bucket)| open_remote(&bucket, &data_root, &config));
            let summary = reporter(&config, &loader, remote.as_ref())?.report_all(&root)?;
            println!(
                "{} plotted, {} skipped, {} failed, {} plots written",
                summary.plotted, summary.skipped, summary.failed, summary.written
            );
        }
        Command::Upload { remote, keep, paths } => {
            let remote = remote.open(&config);
            for path in &paths {
                upload(&remote, path, !keep)?;
            }
        }
        Command::Download { remote, paths } => {
            let remote = remote.open(&config);
            for path in &paths {
                if remote.download(path)? {
                    println!("{}: downloaded", path.display());
                }
            }
        }
        Command::RemoteReport { remote, prefix } => {
            let remote = remote.open(&config);
            let prefix = prefix.unwrap_or_else(|| remote.data_root().to_path_buf());
            let reporter = reporter(&config, &loader, Some(&remote))?;
            let summary = remote_report(&remote, &reporter, &prefix)?;
            println!(
                "{} sets reported, {} already reported, {} tensors downloaded, {} files uploaded",
                summary.reported, summary.skipped, summary.downloaded, summary.uploaded
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match flexi_logger::Logger::try_with_env_or_str(&cli.log_level)
        .and_then(flexi_logger::Logger::start)
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            let mut source = e.source();
            while let Some(cause) = source {
                log::error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

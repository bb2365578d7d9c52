//! Reading a directory of co-registered rasters into one
//! [`MultiChannelImage`].

use std::fs;
use std::path::{Path, PathBuf};

use crownscan_pipeline::channels::{self, RawRaster};
use crownscan_pipeline::{ChannelError, ChannelTable, MultiChannelImage};

use crate::raster::{RasterError, read_raster};

/// Extensions recognised as source rasters.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["tif", "png", "jpg"];

/// Errors from loading source rasters.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A raster's file name has no channel descriptor.
    #[error("no channel descriptor for {}", .0.display())]
    UnknownFile(PathBuf),

    /// A raster could not be decoded.
    #[error("{}: {source}", path.display())]
    Raster {
        /// Raster path.
        path: PathBuf,
        /// Decoding error.
        #[source]
        source: RasterError,
    },

    /// The decoded rasters do not form a valid image.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A directory or file could not be read.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The channel table file is not valid JSON for a table.
    #[error("{}: {source}", path.display())]
    Json {
        /// Table path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Loads rasters according to a [`ChannelTable`].
#[derive(Debug, Clone, Default)]
pub struct ChannelLoader {
    table: ChannelTable,
}

impl ChannelLoader {
    /// A loader for the channels in `table`.
    #[must_use]
    pub const fn new(table: ChannelTable) -> Self {
        Self { table }
    }

    /// Read the channel table from a JSON array of descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`] or [`LoadError::Json`].
    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { table })
    }

    /// The channel table in use.
    #[must_use]
    pub const fn table(&self) -> &ChannelTable {
        &self.table
    }

    /// Source rasters directly inside `dir`, in table order. Files the
    /// table does not know sort last, by name, so that [`Self::load`]
    /// reports them.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`] if `dir` cannot be read.
    pub fn image_paths(&self, dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let io_err = |source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e));
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort_by_cached_key(|p| {
            let name = file_name(p);
            (self.table.position(&name).unwrap_or(usize::MAX), name)
        });
        Ok(paths)
    }

    /// Decode `paths` and assemble them, in the given order, into one
    /// normalized image.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnknownFile`] for a file name missing from the
    /// table, [`LoadError::Raster`] for undecodable files, and
    /// [`LoadError::Channel`] when the rasters fail assembly or
    /// validation.
    pub fn load(
        &self,
        paths: &[PathBuf],
        normalize_per_pixel: bool,
    ) -> Result<MultiChannelImage, LoadError> {
        let mut decoded = Vec::with_capacity(paths.len());
        for path in paths {
            let descriptor = self
                .table
                .lookup(&file_name(path))
                .ok_or_else(|| LoadError::UnknownFile(path.clone()))?;
            let samples = read_raster(path, descriptor.reader).map_err(|source| LoadError::Raster {
                path: path.clone(),
                source,
            })?;
            log::debug!("read {} {:?}", path.display(), samples.dim());
            decoded.push((descriptor, samples));
        }

        let rasters: Vec<RawRaster<'_>> = decoded
            .iter()
            .map(|(descriptor, samples)| RawRaster {
                descriptor: *descriptor,
                samples: samples.view(),
            })
            .collect();
        let image = channels::assemble(&rasters, normalize_per_pixel)?;
        log::info!(
            "loaded {}x{} image with channels {:?}",
            image.height(),
            image.width(),
            image.labels()
        );
        Ok(image)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crownscan_pipeline::{ChannelDescriptor, ReaderKind};
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    fn table() -> ChannelTable {
        ChannelTable::new(vec![
            ChannelDescriptor {
                file_name: "rgb.png".into(),
                bits: 8,
                channels: Some(vec![2, 0]),
                names: vec!["B".into(), "R".into()],
                reader: ReaderKind::Image,
            },
            ChannelDescriptor {
                file_name: "nir.tif".into(),
                bits: 8,
                channels: None,
                names: vec!["NIR".into()],
                reader: ReaderKind::Tiff,
            },
        ])
    }

    fn write_sources(dir: &Path) {
        let mut rgb = RgbImage::new(4, 3);
        rgb.put_pixel(1, 2, Rgb([128, 0, 64]));
        rgb.save(dir.join("rgb.png")).unwrap();
        let mut nir = GrayImage::new(4, 3);
        nir.put_pixel(1, 2, Luma([32]));
        nir.save(dir.join("nir.tif")).unwrap();
    }

    #[test]
    fn paths_follow_table_order() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        fs::write(dir.path().join("bounds.csv"), "name|y0|y1|x0|x1\n").unwrap();
        GrayImage::new(1, 1).save(dir.path().join("aaa.png")).unwrap();

        let paths = ChannelLoader::new(table()).image_paths(dir.path()).unwrap();
        let names: Vec<_> = paths.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, ["rgb.png", "nir.tif", "aaa.png"]);
    }

    #[test]
    fn load_selects_and_normalizes_channels() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let loader = ChannelLoader::new(table());
        let paths = [dir.path().join("rgb.png"), dir.path().join("nir.tif")];

        let image = loader.load(&paths, false).unwrap();
        assert_eq!(image.labels(), ["B", "R", "NIR"]);
        assert_eq!(image.data().dim(), (3, 4, 3));
        assert!((image.data()[[2, 1, 0]] - 0.25).abs() < 1e-6);
        assert!((image.data()[[2, 1, 1]] - 0.5).abs() < 1e-6);
        assert!((image.data()[[2, 1, 2]] - 0.125).abs() < 1e-6);
    }

    #[test]
    fn unknown_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let stray = dir.path().join("stray.png");
        GrayImage::new(1, 1).save(&stray).unwrap();
        let err = ChannelLoader::new(table()).load(&[stray], false).unwrap_err();
        assert!(matches!(err, LoadError::UnknownFile(_)));
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        GrayImage::new(5, 3).save(dir.path().join("nir.tif")).unwrap();
        let loader = ChannelLoader::new(table());
        let err = loader
            .load(&[dir.path().join("rgb.png"), dir.path().join("nir.tif")], false)
            .unwrap_err();
        assert!(matches!(err, LoadError::Channel(ChannelError::ShapeMismatch { .. })));
    }

    #[test]
    fn table_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        fs::write(
            &path,
            r#"[{"file_name": "x.tif", "bits": 12, "channels": null, "names": ["X"]}]"#,
        )
        .unwrap();
        let loader = ChannelLoader::from_json_file(&path).unwrap();
        assert_eq!(loader.table().labels(), ["X"]);
        assert_eq!(loader.table().lookup("x.tif").unwrap().reader, ReaderKind::Tiff);

        fs::write(&path, "{").unwrap();
        assert!(matches!(
            ChannelLoader::from_json_file(&path),
            Err(LoadError::Json { .. })
        ));
    }
}

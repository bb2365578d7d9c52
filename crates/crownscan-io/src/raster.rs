//! Raster decoding into `(height, width, samples)` arrays.
//!
//! Sample values are returned as raw numbers (not rescaled) so the
//! channel descriptor's bit depth decides the normalization.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crownscan_pipeline::ReaderKind;
use image::DynamicImage;
use ndarray::Array3;
use tiff::decoder::{Decoder, DecodingResult, Limits};

/// Errors that can occur while decoding a raster.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// The file could not be opened.
    #[error("failed to open raster: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding failed.
    #[error("TIFF decoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Decoding through the `image` crate failed.
    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// The pixel layout is not supported.
    #[error("unsupported pixel layout: {0}")]
    Unsupported(String),

    /// The decoded buffer does not divide into whole pixels.
    #[error("decoded {len} samples for a {height}x{width} raster")]
    Length {
        /// Samples decoded.
        len: usize,
        /// Raster height.
        height: usize,
        /// Raster width.
        width: usize,
    },
}

/// Decode the raster at `path` with the given reader.
///
/// # Errors
///
/// Returns [`RasterError`] if the file cannot be opened or decoded.
pub fn read_raster(path: &Path, reader: ReaderKind) -> Result<Array3<f32>, RasterError> {
    match reader {
        ReaderKind::Tiff => read_tiff(path),
        ReaderKind::Image => read_image(path),
    }
}

/// Decode the first TIFF page, any sample layout, with no size limits
/// (orthomosaics routinely exceed the decoder's default budget).
fn read_tiff(path: &Path) -> Result<Array3<f32>, RasterError> {
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;

    #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
    let samples: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        #[allow(clippy::cast_possible_truncation)]
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
    };
    to_array(samples, height as usize, width as usize)
}

/// Decode PNG or JPEG through the `image` crate, keeping native depth.
fn read_image(path: &Path) -> Result<Array3<f32>, RasterError> {
    let image = image::open(path)?;
    let (width, height) = (image.width() as usize, image.height() as usize);
    let samples: Vec<f32> = match image {
        DynamicImage::ImageLuma8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageLumaA8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageRgb8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageRgba8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageLuma16(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageLumaA16(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageRgb16(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageRgba16(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageRgb32F(buf) => buf.into_raw(),
        DynamicImage::ImageRgba32F(buf) => buf.into_raw(),
        other => return Err(RasterError::Unsupported(format!("{:?}", other.color()))),
    };
    to_array(samples, height, width)
}

fn to_array(samples: Vec<f32>, height: usize, width: usize) -> Result<Array3<f32>, RasterError> {
    let pixels = height * width;
    let len = samples.len();
    if pixels == 0 || len % pixels != 0 {
        return Err(RasterError::Length { len, height, width });
    }
    Array3::from_shape_vec((height, width, len / pixels), samples)
        .map_err(|_| RasterError::Length { len, height, width })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    #[test]
    fn png_rgb_keeps_raw_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([10, 200, 255]));
        img.save(&path).unwrap();

        let data = read_raster(&path, ReaderKind::Image).unwrap();
        assert_eq!(data.dim(), (2, 3, 3));
        assert_eq!(data[[1, 2, 0]], 10.0);
        assert_eq!(data[[1, 2, 2]], 255.0);
        assert_eq!(data[[0, 0, 1]], 0.0);
    }

    #[test]
    fn tiff_single_band_has_one_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band.tif");
        let mut img = GrayImage::new(4, 5);
        img.put_pixel(3, 4, Luma([77]));
        img.save(&path).unwrap();

        let data = read_raster(&path, ReaderKind::Tiff).unwrap();
        assert_eq!(data.dim(), (5, 4, 1));
        assert_eq!(data[[4, 3, 0]], 77.0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_raster(Path::new("/nonexistent/result.tif"), ReaderKind::Tiff).unwrap_err();
        assert!(matches!(err, RasterError::Io(_)));
    }

    #[test]
    fn ragged_buffer_is_rejected() {
        assert!(matches!(
            to_array(vec![0.0; 7], 2, 2),
            Err(RasterError::Length { len: 7, .. })
        ));
    }
}

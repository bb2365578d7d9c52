//! NPY (NumPy array file) encoding for half-precision feature tensors.
//!
//! Writes format version 1.0 with dtype `<f2` in C order, readable by
//! `numpy.load`. Reading accepts versions 1.0 and 2.0 but only the same
//! dtype and a 4-D shape.

use std::io::{Read, Write};

use crownscan_pipeline::{FeatureTensor, f16};
use ndarray::Array4;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const DTYPE: &str = "<f2";
/// Total header size (prelude + dictionary) is padded to this multiple.
const ALIGN: usize = 64;

/// Errors raised while reading an NPY file.
#[derive(Debug, thiserror::Error)]
pub enum NpyError {
    /// Underlying read or write failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file does not start with the NPY magic string.
    #[error("not an NPY file")]
    BadMagic,

    /// The format version is not 1.0 or 2.0.
    #[error("unsupported NPY version {0}.{1}")]
    Version(u8, u8),

    /// The header dictionary could not be parsed.
    #[error("malformed NPY header: {0}")]
    Header(String),

    /// The array is not a 4-D little-endian half-precision array in C
    /// order.
    #[error("unsupported array layout: {0}")]
    Layout(String),

    /// The data section length does not match the shape.
    #[error("expected {expected} bytes of data, found {found}")]
    Length {
        /// Bytes implied by the shape.
        expected: usize,
        /// Bytes present.
        found: usize,
    },
}

/// Write `tensor` as an NPY v1.0 file.
///
/// # Errors
///
/// Returns any error from `writer`, or an error if the header is too
/// long for version 1.0.
pub fn write_tensor<W: Write>(mut writer: W, tensor: &FeatureTensor) -> std::io::Result<()> {
    let (h, w, p, f) = tensor.dim();
    let dict = format!(
        "{{'descr': '{DTYPE}', 'fortran_order': False, 'shape': ({h}, {w}, {p}, {f}), }}"
    );
    // magic + version + u16 length + dict + '\n'
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (ALIGN - unpadded % ALIGN) % ALIGN;
    let header = format!("{dict}{}\n", " ".repeat(pad));
    let header_len = u16::try_from(header.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "NPY header too long")
    })?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;

    let mut data = Vec::with_capacity(tensor.data().len() * 2);
    for v in tensor.data() {
        data.extend_from_slice(&v.to_le_bytes());
    }
    writer.write_all(&data)
}

/// Read a tensor written by [`write_tensor`] (or by NumPy with the same
/// dtype and rank).
///
/// # Errors
///
/// Returns [`NpyError`] if the stream is not a 4-D `<f2` C-order array
/// or is truncated.
pub fn read_tensor<R: Read>(mut reader: R) -> Result<FeatureTensor, NpyError> {
    let mut magic = [0_u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let mut version = [0_u8; 2];
    reader.read_exact(&mut version)?;
    let header_len = match version {
        [1, 0] => {
            let mut len = [0_u8; 2];
            reader.read_exact(&mut len)?;
            usize::from(u16::from_le_bytes(len))
        }
        [2, 0] => {
            let mut len = [0_u8; 4];
            reader.read_exact(&mut len)?;
            usize::try_from(u32::from_le_bytes(len))
                .map_err(|_| NpyError::Header("header length overflows".into()))?
        }
        [major, minor] => return Err(NpyError::Version(major, minor)),
    };
    let mut header = vec![0_u8; header_len];
    reader.read_exact(&mut header)?;
    let header = std::str::from_utf8(&header)
        .map_err(|e| NpyError::Header(e.to_string()))?;

    let descr = dict_value(header, "descr")?;
    if descr.trim_matches(|c| c == '\'' || c == '"') != DTYPE {
        return Err(NpyError::Layout(format!("dtype {descr}")));
    }
    if dict_value(header, "fortran_order")? != "False" {
        return Err(NpyError::Layout("Fortran order".into()));
    }
    let shape = parse_shape(dict_value(header, "shape")?)?;
    let &[h, w, p, f] = shape.as_slice() else {
        return Err(NpyError::Layout(format!("rank {} shape {shape:?}", shape.len())));
    };

    let expected = [h, w, p, f, 2]
        .into_iter()
        .try_fold(1_usize, usize::checked_mul)
        .ok_or_else(|| NpyError::Layout(format!("shape {shape:?} overflows")))?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    if data.len() != expected {
        return Err(NpyError::Length {
            expected,
            found: data.len(),
        });
    }
    let values: Vec<f16> = data
        .chunks_exact(2)
        .map(|b| f16::from_le_bytes([b[0], b[1]]))
        .collect();
    let array = Array4::from_shape_vec((h, w, p, f), values)
        .map_err(|e| NpyError::Layout(e.to_string()))?;
    Ok(FeatureTensor::new(array))
}

/// Raw text of `key`'s value in a Python dict literal, up to the next
/// top-level comma.
fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let missing = || NpyError::Header(format!("missing key `{key}`"));
    let start = header
        .find(&format!("'{key}'"))
        .or_else(|| header.find(&format!("\"{key}\"")))
        .ok_or_else(missing)?;
    let rest = &header[start + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':').ok_or_else(missing)?.trim_start();

    let mut depth = 0_usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' | '}' if depth == 0 => return Ok(rest[..i].trim()),
            _ => {}
        }
    }
    Err(NpyError::Header(format!("unterminated value for `{key}`")))
}

fn parse_shape(text: &str) -> Result<Vec<usize>, NpyError> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| NpyError::Header(format!("shape {text}")))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| NpyError::Header(format!("shape dimension {s:?}")))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> FeatureTensor {
        FeatureTensor::from_f32(&Array4::from_shape_fn((3, 2, 2, 4), |(y, x, p, f)| {
            #[allow(clippy::cast_precision_loss)]
            let v = (y * 16 + x * 8 + p * 4 + f) as f32 / 64.0;
            v
        }))
    }

    #[test]
    fn header_is_aligned_and_parseable() {
        let mut bytes = Vec::new();
        write_tensor(&mut bytes, &sample()).unwrap();
        assert_eq!(&bytes[..6], MAGIC);
        assert_eq!(&bytes[6..8], &[1, 0]);
        let header_len = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
        assert_eq!((10 + header_len) % ALIGN, 0);
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.starts_with("{'descr': '<f2', 'fortran_order': False, 'shape': (3, 2, 2, 4), }"));
        assert!(header.ends_with('\n'));
        assert_eq!(bytes.len(), 10 + header_len + 3 * 2 * 2 * 4 * 2);
    }

    #[test]
    fn read_returns_written_tensor() {
        let tensor = sample();
        let mut bytes = Vec::new();
        write_tensor(&mut bytes, &tensor).unwrap();
        assert_eq!(read_tensor(bytes.as_slice()).unwrap(), tensor);
    }

    #[test]
    fn numpy_style_header_is_accepted() {
        // Header as written by numpy for np.zeros((1, 1, 1, 1), '<f2').
        let dict = "{'descr': '<f2', 'fortran_order': False, 'shape': (1, 1, 1, 1), }";
        let mut header = format!("{dict}{}", " ".repeat(118 - dict.len() - 1));
        header.push('\n');
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&f16::from_f32(0.5).to_le_bytes());

        let tensor = read_tensor(bytes.as_slice()).unwrap();
        assert_eq!(tensor.dim(), (1, 1, 1, 1));
        assert_eq!(tensor.data()[[0, 0, 0, 0]].to_f32(), 0.5);
    }

    #[test]
    fn wrong_dtype_is_rejected() {
        let mut bytes = Vec::new();
        write_tensor(&mut bytes, &sample()).unwrap();
        let pos = bytes.windows(3).position(|w| w == b"<f2").unwrap();
        bytes[pos + 2] = b'4';
        let err = read_tensor(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, NpyError::Layout(_)));
    }

    #[test]
    fn truncated_data_is_rejected() {
        let mut bytes = Vec::new();
        write_tensor(&mut bytes, &sample()).unwrap();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            read_tensor(bytes.as_slice()),
            Err(NpyError::Length { .. })
        ));
    }

    #[test]
    fn oversized_shape_is_rejected() {
        let dict = "{'descr': '<f2', 'fortran_order': False, 'shape': (4294967296, 4294967296, 2, 2), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&u16::try_from(dict.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(read_tensor(bytes.as_slice()), Err(NpyError::Layout(_))));
    }

    #[test]
    fn garbage_is_not_npy() {
        assert!(matches!(read_tensor(&b"PK\x03\x04zip!"[..]), Err(NpyError::BadMagic)));
    }

    #[test]
    fn three_dimensional_arrays_are_rejected() {
        let dict = "{'descr': '<f2', 'fortran_order': False, 'shape': (2, 2, 2), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&u16::try_from(dict.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        assert!(matches!(read_tensor(bytes.as_slice()), Err(NpyError::Layout(_))));
    }
}

//! NumPy `.npy` / `.npz` codec for cached grids and point arrays.
//!
//! Arrays are always handed out as `f32`; half precision is only an on-disk
//! representation. Archives are written uncompressed, and both stored and
//! deflated entries are accepted on read.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use half::f16;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{FieldError, Result};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Header alignment required by the format.
const HEADER_ALIGN: usize = 64;

/// Element precision used when writing arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Half,
    Single,
}

impl Precision {
    fn descr(self) -> &'static str {
        match self {
            Precision::Half => "<f2",
            Precision::Single => "<f4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    F16,
    F32,
    F64,
}

impl Element {
    fn size(self) -> usize {
        match self {
            Element::F16 => 2,
            Element::F32 => 4,
            Element::F64 => 8,
        }
    }
}

#[derive(Debug, PartialEq)]
struct NpyHeader {
    element: Element,
    endian: Endian,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Decode a complete `.npy` payload into an `f32` array.
pub fn decode_npy(path: &Path, bytes: &[u8]) -> Result<ArrayD<f32>> {
    let (header, data_offset) = parse_header(path, bytes)?;

    let needed = header
        .shape
        .iter()
        .try_fold(header.element.size(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| FieldError::npy(path, format!("shape {:?} is too large", header.shape)))?;
    let data = &bytes[data_offset..];
    if data.len() < needed {
        return Err(FieldError::npy(
            path,
            format!("truncated payload: {} of {} bytes", data.len(), needed),
        ));
    }
    let values = decode_values(&data[..needed], header.element, header.endian);

    let array = if header.fortran_order {
        ArrayD::from_shape_vec(IxDyn(&header.shape).f(), values)
    } else {
        ArrayD::from_shape_vec(IxDyn(&header.shape), values)
    };
    array.map_err(|e| FieldError::npy(path, e.to_string()))
}

/// Encode an array as a C-ordered little-endian `.npy` payload.
pub fn encode_npy(array: &ArrayD<f32>, precision: Precision) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        precision.descr(),
        shape_tuple(array.shape())
    );

    // Magic, version and a u16 length precede the header; the header ends in '\n'.
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let element_size = match precision {
        Precision::Half => 2,
        Precision::Single => 4,
    };
    let mut bytes = Vec::with_capacity(10 + header.len() + array.len() * element_size);
    bytes.extend_from_slice(NPY_MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());

    match precision {
        Precision::Half => {
            for &value in array.iter() {
                bytes.extend_from_slice(&f16::from_f32(value).to_bits().to_le_bytes());
            }
        }
        Precision::Single => {
            for &value in array.iter() {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    bytes
}

/// Read a standalone `.npy` file.
pub fn read_npy(path: &Path) -> Result<ArrayD<f32>> {
    let bytes = fs::read(path).map_err(|e| FieldError::io(path, e))?;
    decode_npy(path, &bytes)
}

/// Write a standalone `.npy` file.
pub fn write_npy(path: &Path, array: &ArrayD<f32>, precision: Precision) -> Result<()> {
    fs::write(path, encode_npy(array, precision)).map_err(|e| FieldError::io(path, e))
}

/// Read-side handle on an `.npz` archive.
pub struct NpzReader {
    path: PathBuf,
    file_len: u64,
    archive: ZipArchive<BufReader<File>>,
}

impl NpzReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| FieldError::io(path, e))?;
        let file_len = file.metadata().map_err(|e| FieldError::io(path, e))?.len();
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|source| FieldError::Zip {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file_len,
            archive,
        })
    }

    /// Names of the arrays stored in the archive.
    pub fn keys(&self) -> Vec<String> {
        self.archive
            .file_names()
            .map(|name| name.trim_end_matches(".npy").to_string())
            .collect()
    }

    /// Decode the array stored under `key`.
    pub fn array(&mut self, key: &str) -> Result<ArrayD<f32>> {
        let entry_name = format!("{key}.npy");
        let mut entry = match self.archive.by_name(&entry_name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(FieldError::MissingKey {
                    path: self.path.clone(),
                    key: key.to_string(),
                });
            }
            Err(source) => {
                return Err(FieldError::Zip {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut bytes = Vec::with_capacity(read_capacity(entry.size(), self.file_len));
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| FieldError::npy(&self.path, format!("{key}: {e}")))?;
        decode_npy(&self.path, &bytes)
    }
}

/// Preallocation for an entry whose header declares `declared` bytes,
/// bounded by the archive length.
fn read_capacity(declared: u64, archive_len: u64) -> usize {
    usize::try_from(declared.min(archive_len)).unwrap_or(0)
}

/// Read a single array from an `.npz` archive.
pub fn read_npz_array(path: &Path, key: &str) -> Result<ArrayD<f32>> {
    NpzReader::open(path)?.array(key)
}

/// Write arrays into a new `.npz` archive at `path`, replacing any existing file.
pub fn write_npz(path: &Path, arrays: &[(&str, &ArrayD<f32>)], precision: Precision) -> Result<()> {
    let zip_err = |source| FieldError::Zip {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(|e| FieldError::io(path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for (key, array) in arrays {
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file(format!("{key}.npy"), options)
            .map_err(zip_err)?;
        zip.write_all(&encode_npy(array, precision))
            .map_err(|e| FieldError::io(path, e))?;
    }

    let mut writer = zip.finish().map_err(zip_err)?;
    writer.flush().map_err(|e| FieldError::io(path, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| FieldError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| FieldError::io(path, e))
}

fn parse_header(path: &Path, bytes: &[u8]) -> Result<(NpyHeader, usize)> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(FieldError::npy(path, "missing NUMPY magic"));
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(FieldError::npy(path, "truncated header"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        other => {
            return Err(FieldError::npy(path, format!("unsupported version {other}")));
        }
    };

    let header_end = header_start + header_len;
    if bytes.len() < header_end {
        return Err(FieldError::npy(path, "truncated header"));
    }
    let text = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|_| FieldError::npy(path, "header is not valid text"))?;

    Ok((parse_dict(path, text)?, header_end))
}

fn parse_dict(path: &Path, text: &str) -> Result<NpyHeader> {
    let descr = dict_value(text, "descr")
        .and_then(quoted)
        .ok_or_else(|| FieldError::npy(path, "header has no descr"))?;
    let (element, endian) = parse_descr(descr)
        .ok_or_else(|| FieldError::npy(path, format!("unsupported dtype '{descr}'")))?;

    let fortran_order = match dict_value(text, "fortran_order") {
        Some(value) if value.starts_with("True") => true,
        Some(value) if value.starts_with("False") => false,
        _ => return Err(FieldError::npy(path, "header has no fortran_order")),
    };

    let shape = dict_value(text, "shape")
        .and_then(parse_shape)
        .ok_or_else(|| FieldError::npy(path, "header has no valid shape"))?;

    Ok(NpyHeader {
        element,
        endian,
        fortran_order,
        shape,
    })
}

/// Text following `'key':` in a header dict.
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{key}'");
    let start = text.find(&needle)? + needle.len();
    let rest = text[start..].trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

fn quoted(value: &str) -> Option<&str> {
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = &value[1..];
    let end = inner.find(quote)?;
    Some(&inner[..end])
}

fn parse_descr(descr: &str) -> Option<(Element, Endian)> {
    let (endian, body) = match descr.chars().next()? {
        '<' | '=' | '|' => (Endian::Little, &descr[1..]),
        '>' => (Endian::Big, &descr[1..]),
        _ => (Endian::Little, descr),
    };
    let element = match body {
        "f2" | "e" => Element::F16,
        "f4" | "f" => Element::F32,
        "f8" | "d" => Element::F64,
        _ => return None,
    };
    Some((element, endian))
}

fn parse_shape(value: &str) -> Option<Vec<usize>> {
    let inner = value.strip_prefix('(')?;
    let inner = &inner[..inner.find(')')?];
    inner
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.trim_end_matches('L').parse().ok())
        .collect()
}

fn shape_tuple(shape: &[usize]) -> String {
    match shape {
        [] => "()".to_string(),
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn decode_values(data: &[u8], element: Element, endian: Endian) -> Vec<f32> {
    match element {
        Element::F16 => data
            .chunks_exact(2)
            .map(|c| {
                let raw = [c[0], c[1]];
                let bits = match endian {
                    Endian::Little => u16::from_le_bytes(raw),
                    Endian::Big => u16::from_be_bytes(raw),
                };
                f16::from_bits(bits).to_f32()
            })
            .collect(),
        Element::F32 => data
            .chunks_exact(4)
            .map(|c| {
                let raw = [c[0], c[1], c[2], c[3]];
                match endian {
                    Endian::Little => f32::from_le_bytes(raw),
                    Endian::Big => f32::from_be_bytes(raw),
                }
            })
            .collect(),
        Element::F64 => data
            .chunks_exact(8)
            .map(|c| {
                let raw = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                let value = match endian {
                    Endian::Little => f64::from_le_bytes(raw),
                    Endian::Big => f64::from_be_bytes(raw),
                };
                value as f32
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};
    use tempfile::tempdir;

    fn raw_npy(header: &str, data: &[u8]) -> Vec<u8> {
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn encoded_header_is_aligned() {
        let array = Array3::<f32>::zeros((4, 4, 4)).into_dyn();
        let bytes = encode_npy(&array, Precision::Half);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % HEADER_ALIGN, 0);
        assert_eq!(bytes.len(), 10 + header_len + 64 * 2);
    }

    #[test]
    fn decodes_fortran_ordered_doubles() {
        // Column-major [[1, 2, 3], [4, 5, 6]]
        let data: Vec<u8> = [1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let bytes = raw_npy(
            "{'descr': '<f8', 'fortran_order': True, 'shape': (2, 3), }\n",
            &data,
        );
        let array = decode_npy(Path::new("f.npy"), &bytes).unwrap();
        assert_eq!(
            array,
            arr2(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn()
        );
    }

    #[test]
    fn decodes_big_endian_singles() {
        let data: Vec<u8> = [0.5f32, -2.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let bytes = raw_npy("{'descr': '>f4', 'fortran_order': False, 'shape': (2,), }\n", &data);
        let array = decode_npy(Path::new("b.npy"), &bytes).unwrap();
        assert_eq!(array.as_slice().unwrap(), &[0.5, -2.0]);
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let bytes = raw_npy(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4,), }\n",
            &[0u8; 6],
        );
        let err = decode_npy(Path::new("t.npy"), &bytes).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn oversized_shape_is_corruption() {
        let bytes = raw_npy(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4294967296, 4294967296, 2), }\n",
            &[0u8; 16],
        );
        let err = decode_npy(Path::new("o.npy"), &bytes).unwrap_err();
        assert!(matches!(err, FieldError::Npy { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode_npy(Path::new("g.npy"), b"not an array at all").unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn npz_keeps_half_precision_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("psr.npz");
        let grid = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 12 + j * 4 + k) as f32 * 0.1)
            .into_dyn();

        write_npz(&path, &[("psr", &grid)], Precision::Half).unwrap();
        let mut reader = NpzReader::open(&path).unwrap();
        assert_eq!(reader.keys(), vec!["psr".to_string()]);
        let loaded = reader.array("psr").unwrap();

        assert_eq!(loaded.shape(), &[2, 3, 4]);
        for (a, b) in loaded.iter().zip(grid.iter()) {
            assert_eq!(*a, f16::from_f32(*b).to_f32());
        }
        assert!(matches!(
            reader.array("normals"),
            Err(FieldError::MissingKey { .. })
        ));
    }

    #[test]
    fn declared_entry_size_does_not_drive_allocation() {
        assert_eq!(read_capacity(0xFFFF_FFF0, 512), 512);
        assert_eq!(read_capacity(128, 512), 128);

        let dir = tempdir().unwrap();
        let path = dir.path().join("psr.npz");
        let grid = Array3::from_elem((2, 2, 2), 1.5f32).into_dyn();
        write_npz(&path, &[("psr", &grid)], Precision::Single).unwrap();

        // Uncompressed size sits 24 bytes into the central directory header.
        let mut bytes = fs::read(&path).unwrap();
        let central = bytes
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        match read_npz_array(&path, "psr") {
            Ok(loaded) => assert_eq!(loaded, grid),
            Err(e) => assert!(e.is_corruption()),
        }
    }
}

//! Disk persistence for observations and assets
//!
//! Everything written under the buffer directory shares one file format:
//!
//! - A JSON body (a single document for assets, JSON lines for observation
//!   pages)
//! - Optionally gzip compressed
//! - Followed by a 4-byte little-endian CRC32 of the preceding bytes
//!
//! Files are written to a hidden temporary name and renamed into place so a
//! crash never leaves a half-written file under a parseable name. On load the
//! CRC is verified first; gzip is detected from its magic bytes, so
//! compressed and plain files can coexist in one directory.
//!
//! Submodules:
//!
//! - `queue`, the bounded dedup queue between the hot path and the writer
//! - `assets`, the `{index}_{type}` asset files
//! - `observations`, the `{first}_{last}` observation pages
//! - `index`, the `{index},{id}` key tables

pub mod assets;
pub mod index;
pub mod observations;
pub mod queue;

use crate::error::{BufferError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Gzip stream magic
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Size of the CRC trailer
const CRC_SIZE: usize = 4;

/// `{number}_{rest}` file names used by both asset files and observation pages
static PAIR_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_(.+)$").expect("file name pattern compiles"));

/// Split a `{number}_{rest}` file name
///
/// Returns `None` for temporary files and anything else not produced by this
/// crate.
pub fn parse_file_name(name: &str) -> Option<(u64, &str)> {
    let captures = PAIR_FILE_NAME.captures(name)?;
    let number = captures.get(1)?.as_str().parse().ok()?;
    Some((number, captures.get(2)?.as_str()))
}

/// Compress (optionally) and append the CRC trailer
pub fn encode_file(body: &[u8], compress: bool) -> Result<Vec<u8>> {
    let mut bytes = if compress {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::fast());
        encoder.write_all(body)?;
        encoder.finish()?
    } else {
        body.to_vec()
    };

    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    Ok(bytes)
}

/// Verify the CRC trailer and decompress when the body is gzip
pub fn decode_file(path: &Path, bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < CRC_SIZE {
        return Err(BufferError::Checksum {
            path: path.to_path_buf(),
        });
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CRC_SIZE);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(body) != expected {
        return Err(BufferError::Checksum {
            path: path.to_path_buf(),
        });
    }

    if body.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::with_capacity(body.len() * 2);
        GzDecoder::new(body).read_to_end(&mut decoded)?;
        Ok(decoded)
    } else {
        Ok(body.to_vec())
    }
}

/// Read and decode a file written by `write_file`
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    decode_file(path, &bytes)
}

/// Encode `body` and move it into place at `path`
pub fn write_file(path: &Path, body: &[u8], compress: bool) -> Result<()> {
    let bytes = encode_file(body, compress)?;
    let tmp = temp_path(path);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// File names in `dir` that parse as `{number}_{rest}`, sorted by number
///
/// A missing directory yields an empty list.
pub fn list_numbered_files(dir: &Path) -> Result<Vec<(u64, String)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((number, _)) = parse_file_name(&name) {
            files.push((number, name));
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("12_CuttingTool"), Some((12, "CuttingTool")));
        assert_eq!(parse_file_name("3_5"), Some((3, "5")));
        assert_eq!(parse_file_name("0_with_underscores"), Some((0, "with_underscores")));
        assert_eq!(parse_file_name(".12_CuttingTool.tmp"), None);
        assert_eq!(parse_file_name("CuttingTool"), None);
        assert_eq!(parse_file_name("12_"), None);
    }

    #[test]
    fn test_encode_decode_compressed() {
        let body = br#"{"assetId":"a"}"#.repeat(10);
        let encoded = encode_file(&body, true).unwrap();
        assert!(encoded.starts_with(&GZIP_MAGIC));
        assert_eq!(decode_file(Path::new("x"), &encoded).unwrap(), body);
    }

    #[test]
    fn test_decode_plain() {
        let encoded = encode_file(b"plain", false).unwrap();
        assert_eq!(encoded.len(), 5 + CRC_SIZE);
        assert_eq!(decode_file(Path::new("x"), &encoded).unwrap(), b"plain");
    }

    #[test]
    fn test_corruption_detected() {
        let mut encoded = encode_file(b"payload", true).unwrap();
        encoded[3] ^= 0xff;
        assert!(matches!(
            decode_file(Path::new("bad"), &encoded),
            Err(BufferError::Checksum { .. })
        ));
        assert!(decode_file(Path::new("short"), b"ab").is_err());
    }

    #[test]
    fn test_write_and_list() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("10_b"), b"b", false).unwrap();
        write_file(&dir.path().join("2_a"), b"a", true).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let files = list_numbered_files(dir.path()).unwrap();
        assert_eq!(files, vec![(2, "2_a".to_string()), (10, "10_b".to_string())]);
        assert_eq!(read_file(&dir.path().join("2_a")).unwrap(), b"a");

        assert!(list_numbered_files(&dir.path().join("missing")).unwrap().is_empty());
    }
}

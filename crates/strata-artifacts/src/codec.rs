//! Compression and checksum codecs for artifact files.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;

use sha1::{Digest, Sha1};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{ArtifactError, Result};
use crate::util::read_file_limited;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Whole-file compression applied to an artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Compression implied by the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Self::Gzip,
            Some("zst") => Self::Zstd,
            _ => Self::None,
        }
    }

    /// Compression implied by the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&GZIP_MAGIC) {
            Self::Gzip
        } else if bytes.starts_with(&ZSTD_MAGIC) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some(".gz"),
            Self::Zstd => Some(".zst"),
        }
    }

    /// Name recorded in shard meta sidecars.
    pub fn meta_name(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
            Self::Zstd => Some("zstd"),
        }
    }
}

/// Read `path` and undo its compression, bounding both the raw and the inflated size.
///
/// Compression comes from the extension; `.bak` files and other unknown extensions are sniffed.
pub fn read_decoded(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let raw = read_file_limited(path, max_bytes)?;
    let compression = match Compression::from_path(path) {
        Compression::None => Compression::sniff(&raw),
        other => other,
    };
    decode_limited(path, raw, compression, max_bytes)
}

pub(crate) fn decode_limited(
    path: &Path,
    raw: Vec<u8>,
    compression: Compression,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let limit = max_bytes.saturating_add(1);
    let mut out = Vec::new();
    let result = match compression {
        Compression::None => return Ok(raw),
        Compression::Gzip => flate2::read::GzDecoder::new(raw.as_slice())
            .take(limit)
            .read_to_end(&mut out),
        Compression::Zstd => zstd::stream::read::Decoder::new(raw.as_slice())
            .and_then(|decoder| decoder.take(limit).read_to_end(&mut out)),
    };
    if let Err(err) = result {
        return Err(ArtifactError::Decompression {
            path: path.to_path_buf(),
            message: err.to_string(),
        });
    }
    if out.len() as u64 > max_bytes {
        return Err(ArtifactError::SizeExceeded {
            path: path.to_path_buf(),
            size: out.len() as u64,
            max_bytes,
        });
    }
    Ok(out)
}

/// Read at most `budget` decoded bytes from the start of `path`.
///
/// Returns the bytes and whether the end of the decoded stream was reached.
pub(crate) fn read_decoded_prefix(path: &Path, budget: u64) -> Result<(Vec<u8>, bool)> {
    crate::util::regular_file_len(path)?;
    let file = std::fs::File::open(path)?;
    let mut reader: Box<dyn Read> = match Compression::from_path(path) {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(file)?),
    };
    let mut out = Vec::new();
    (&mut reader)
        .take(budget.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|err| ArtifactError::Decompression {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    let complete = out.len() as u64 <= budget;
    out.truncate(budget as usize);
    Ok((out, complete))
}

pub fn encode(bytes: &[u8], compression: Compression) -> io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
        Compression::Zstd => zstd::bulk::compress(bytes, 0),
    }
}

/// Hash algorithms accepted in manifest `checksum` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
    Sha1,
    Xxh64,
}

impl ChecksumAlgo {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Xxh64 => "xxh64",
        }
    }
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `algo:hex` checksum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChecksum {
    Supported { algo: ChecksumAlgo, expected: String },
    Unsupported { algo: String },
    Malformed,
}

pub fn parse_checksum(raw: &str) -> ParsedChecksum {
    let Some((algo, expected)) = raw.split_once(':') else {
        return ParsedChecksum::Malformed;
    };
    if algo.is_empty() || expected.is_empty() {
        return ParsedChecksum::Malformed;
    }
    let expected = expected.to_ascii_lowercase();
    match algo {
        "sha1" => ParsedChecksum::Supported {
            algo: ChecksumAlgo::Sha1,
            expected,
        },
        "xxh64" => ParsedChecksum::Supported {
            algo: ChecksumAlgo::Xxh64,
            expected,
        },
        other => ParsedChecksum::Unsupported {
            algo: other.to_string(),
        },
    }
}

/// Stream `path` through `algo` and return the lowercase hex digest.
pub fn file_checksum(path: &Path, algo: ChecksumAlgo) -> Result<String> {
    crate::util::regular_file_len(path)?;
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    match algo {
        ChecksumAlgo::Sha1 => {
            let mut hasher = Sha1::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        ChecksumAlgo::Xxh64 => {
            let mut hasher = Xxh64::new(0);
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:016x}", hasher.digest()))
        }
    }
}

pub fn bytes_checksum(bytes: &[u8], algo: ChecksumAlgo) -> String {
    match algo {
        ChecksumAlgo::Sha1 => hex::encode(Sha1::digest(bytes)),
        ChecksumAlgo::Xxh64 => format!("{:016x}", xxhash_rust::xxh64::xxh64(bytes, 0)),
    }
}

/// Short content hash used for derived identifiers.
pub fn content_hash_hex(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hex::encode(&hash.as_bytes()[..8])
}

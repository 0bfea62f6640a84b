//! Snapshot file for the content cache
//!
//! Layout: a fixed 32-byte header followed by the bincode-encoded cache.
//!
//! ```text
//! 0..4    magic "SOSC"
//! 4..8    format version
//! 8..16   body length
//! 16..20  CRC32C of the body
//! 20..24  reserved
//! 24..32  creation time (epoch millis)
//! ```
//!
//! All integers are little-endian. Writes go to a sibling `.partial` file
//! which is synced and renamed over the target, so readers never see a
//! half-written snapshot.

use crate::content::ContentCache;
use sos_common::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Header of a snapshot file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    pub body_len: u64,
    pub checksum: u32,
    pub created_at: u64,
}

impl SnapshotHeader {
    pub const MAGIC: u32 = 0x4353_4F53; // "SOSC"
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 32;

    pub fn new(body: &[u8]) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            body_len: body.len() as u64,
            checksum: crc32c::crc32c(body),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.body_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf[24..32].copy_from_slice(&self.created_at.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::InvalidSnapshot(format!(
                "header truncated: {} of {} bytes",
                data.len(),
                Self::SIZE
            )));
        }
        let u32_at = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&data[at..at + 8]);
            u64::from_le_bytes(b)
        };

        let magic = u32_at(0);
        if magic != Self::MAGIC {
            return Err(Error::InvalidSnapshot(format!("bad magic {magic:#010x}")));
        }
        let version = u32_at(4);
        if version != Self::VERSION {
            return Err(Error::UnsupportedSnapshotVersion {
                found: version,
                expected: Self::VERSION,
            });
        }
        Ok(Self {
            magic,
            version,
            body_len: u64_at(8),
            checksum: u32_at(16),
            created_at: u64_at(24),
        })
    }
}

/// Encode a cache into the on-disk representation
pub fn encode(cache: &ContentCache) -> Result<Vec<u8>> {
    let body = bincode::serialize(cache)
        .map_err(|e| Error::Serialization(format!("failed to encode content cache: {e}")))?;
    let header = SnapshotHeader::new(&body);

    let mut out = Vec::with_capacity(SnapshotHeader::SIZE + body.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a cache from the on-disk representation
pub fn decode(data: &[u8]) -> Result<ContentCache> {
    let header = SnapshotHeader::from_bytes(data)?;
    let body = &data[SnapshotHeader::SIZE..];
    if body.len() as u64 != header.body_len {
        return Err(Error::InvalidSnapshot(format!(
            "body length {} does not match header length {}",
            body.len(),
            header.body_len
        )));
    }

    let actual = crc32c::crc32c(body);
    if actual != header.checksum {
        return Err(Error::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    bincode::deserialize(body)
        .map_err(|e| Error::Deserialization(format!("failed to decode content cache: {e}")))
}

/// The single file a controller persists its cache to
#[derive(Clone, Debug)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".partial");
        self.path.with_file_name(name)
    }

    /// Overwrite the file with `cache`, returning the number of bytes written
    pub fn store(&self, cache: &ContentCache) -> Result<u64> {
        let data = encode(cache)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let partial = self.partial_path();
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&partial)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&data)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&partial, &self.path)?;

        debug!("Serialized content cache to {:?} ({} bytes)", self.path, data.len());
        Ok(data.len() as u64)
    }

    /// Read the file, `None` if it does not exist
    pub fn load(&self) -> Result<Option<ContentCache>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        decode(&data).map(Some)
    }

    /// Read the file and delete it, whether or not it could be decoded
    ///
    /// A snapshot is only trusted once: after a crash the next start must
    /// not pick up a file that predates later mutations.
    pub fn take(&self) -> Result<Option<ContentCache>> {
        let loaded = self.load();
        if !matches!(loaded, Ok(None)) {
            if let Err(e) = self.remove() {
                warn!("Failed to delete cache file {:?}: {}", self.path, e);
            }
        }
        loaded
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sos_common::TimePeriod;
    use tempfile::tempdir;

    fn sample() -> ContentCache {
        let mut cache = ContentCache::default();
        cache.add_offering("off-1");
        cache.add_procedure("proc-1");
        cache.link_offering_procedure("off-1", "proc-1");
        cache.extend_phenomenon_time_for_offering("off-1", TimePeriod::new(1, 2));
        cache
    }

    #[test]
    fn test_store_and_take() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("cache.tmp"));

        let written = file.store(&sample()).unwrap();
        assert!(written > SnapshotHeader::SIZE as u64);
        assert!(file.path().exists());
        assert!(!file.partial_path().exists());

        let loaded = file.take().unwrap().unwrap();
        assert_eq!(loaded, sample());
        assert!(!file.path().exists());

        // Nothing left to take
        assert!(file.take().unwrap().is_none());
    }

    #[test]
    fn test_store_overwrites() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested").join("cache.tmp"));

        file.store(&sample()).unwrap();
        file.store(&ContentCache::default()).unwrap();

        assert_eq!(file.load().unwrap().unwrap(), ContentCache::default());
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut data = encode(&sample()).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(matches!(decode(&data), Err(Error::ChecksumMismatch { .. })));

        let data = encode(&sample()).unwrap();
        assert!(matches!(decode(&data[..data.len() - 3]), Err(Error::InvalidSnapshot(_))));
        assert!(matches!(decode(&data[..10]), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut data = encode(&sample()).unwrap();
        data[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            decode(&data),
            Err(Error::UnsupportedSnapshotVersion { found: 7, expected: 1 })
        ));
    }

    #[test]
    fn test_corrupt_file_is_removed_on_take() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.tmp");
        fs::write(&path, b"not a snapshot").unwrap();

        let file = SnapshotFile::new(&path);
        assert!(file.take().is_err());
        assert!(!path.exists());
    }
}

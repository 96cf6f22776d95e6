//! Cache metadata snapshots
//!
//! Binary export/import of artifact cache metadata. Payload bytes are
//! never written; a snapshot records the configuration and per-entry
//! metadata only, enough to inspect or warm-plan a cache across runs.
//!
//! File layout, all integers little-endian:
//!
//! ```text
//! magic        8 bytes  "VWCACHE1"
//! version      u32
//! max_memory   u64
//! max_items    u32
//! max_age_secs u64
//! policy       u32 length + UTF-8 bytes
//! entry_count  u32
//! entries      kind u8, page u32, modifier (u32 length + UTF-8, 0 = none),
//!              priority u8, created_ms u64, last_access_ms u64,
//!              access_count u64, size_bytes u64
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{ArtifactKind, CachePriority};

const MAGIC: &[u8; 8] = b"VWCACHE1";
const FORMAT_VERSION: u32 = 1;

/// Strings longer than this are treated as corruption
const MAX_STRING_LEN: u32 = 64 * 1024;

/// Entry counts larger than this are treated as corruption
const MAX_ENTRIES: u32 = 10_000_000;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),

    #[error("not a cache snapshot file")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),
}

/// Cache configuration recorded in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotConfig {
    pub max_memory: u64,
    pub max_items: u32,
    pub max_age_secs: u64,
    pub eviction_policy: String,
}

/// Metadata for one cached artifact
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMeta {
    pub kind: ArtifactKind,
    pub page_number: u32,
    pub modifier: Option<String>,
    pub priority: CachePriority,
    pub created_ms: u64,
    pub last_access_ms: u64,
    pub access_count: u64,
    pub size_bytes: u64,
}

/// A complete snapshot: configuration plus entry metadata
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub config: SnapshotConfig,
    pub entries: Vec<EntryMeta>,
}

/// What an import found
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub config: SnapshotConfig,
}

impl From<Snapshot> for ImportSummary {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            entry_count: snapshot.entries.len(),
            total_size_bytes: snapshot.entries.iter().map(|e| e.size_bytes).sum(),
            config: snapshot.config,
        }
    }
}

/// Default snapshot location under the user cache directory
pub fn default_snapshot_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("document-viewer").join("artifacts.cachemeta"))
}

/// Write a snapshot to disk
pub fn write_snapshot_file(path: &Path, snapshot: &Snapshot) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);

    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&snapshot.config.max_memory.to_le_bytes())?;
    writer.write_all(&snapshot.config.max_items.to_le_bytes())?;
    writer.write_all(&snapshot.config.max_age_secs.to_le_bytes())?;
    write_string(&mut writer, &snapshot.config.eviction_policy)?;
    writer.write_all(&(snapshot.entries.len() as u32).to_le_bytes())?;

    for entry in &snapshot.entries {
        writer.write_all(&[entry.kind.code()])?;
        writer.write_all(&entry.page_number.to_le_bytes())?;
        write_string(&mut writer, entry.modifier.as_deref().unwrap_or(""))?;
        writer.write_all(&[entry.priority.rank()])?;
        writer.write_all(&entry.created_ms.to_le_bytes())?;
        writer.write_all(&entry.last_access_ms.to_le_bytes())?;
        writer.write_all(&entry.access_count.to_le_bytes())?;
        writer.write_all(&entry.size_bytes.to_le_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

/// Read and validate a snapshot from disk
pub fn read_snapshot_file(path: &Path) -> Result<Snapshot, PersistError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PersistError::BadMagic);
    }

    let version = read_u32(&mut reader)?;
    if version != FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    let max_memory = read_u64(&mut reader)?;
    let max_items = read_u32(&mut reader)?;
    let max_age_secs = read_u64(&mut reader)?;
    let eviction_policy = read_string(&mut reader)?;
    let entry_count = read_u32(&mut reader)?;
    if entry_count > MAX_ENTRIES {
        return Err(PersistError::Corrupt("entry count implausible"));
    }

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let kind = ArtifactKind::from_code(read_u8(&mut reader)?)
            .ok_or(PersistError::Corrupt("unknown artifact kind"))?;
        let page_number = read_u32(&mut reader)?;
        let modifier = match read_string(&mut reader)? {
            s if s.is_empty() => None,
            s => Some(s),
        };
        let priority = CachePriority::from_rank(read_u8(&mut reader)?)
            .ok_or(PersistError::Corrupt("unknown priority"))?;
        entries.push(EntryMeta {
            kind,
            page_number,
            modifier,
            priority,
            created_ms: read_u64(&mut reader)?,
            last_access_ms: read_u64(&mut reader)?,
            access_count: read_u64(&mut reader)?,
            size_bytes: read_u64(&mut reader)?,
        });
    }

    Ok(Snapshot {
        config: SnapshotConfig {
            max_memory,
            max_items,
            max_age_secs,
            eviction_policy,
        },
        entries,
    })
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), PersistError> {
    writer.write_all(&(value.len() as u32).to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, PersistError> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        return Err(PersistError::Corrupt("string length implausible"));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| PersistError::Corrupt("invalid utf-8"))
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8, PersistError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, PersistError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, PersistError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

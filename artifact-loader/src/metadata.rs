use crate::device::DeviceStats;
use crate::error::{ErrorKind, LoadError};
use crate::types::{ArtifactId, Device, FormatTag, Precision};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Description of a successful load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadMetadata {
    pub path: PathBuf,
    pub format: FormatTag,
    pub device: Device,
    pub precision: Precision,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_stats: Option<DeviceStats>,
    pub load_time_ms: u64,
    pub load_id: ArtifactId,
}

impl LoadMetadata {
    /// Attach the identity and duration of the load that produced this record
    pub fn with_load(mut self, load_id: ArtifactId, load_time_ms: u64) -> Self {
        self.load_id = load_id;
        self.load_time_ms = load_time_ms;
        self
    }
}

/// Structured failure returned in place of load metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub success: bool,
    pub kind: ErrorKind,
    pub error: String,
}

impl FailureRecord {
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            kind,
            error: error.into(),
        }
    }

    pub fn file_not_found() -> Self {
        Self::new(ErrorKind::FileNotFound, ErrorKind::FileNotFound.as_str())
    }

    pub fn from_error(error: &LoadError) -> Self {
        match error {
            LoadError::FileNotFound(_) => Self::file_not_found(),
            other => Self::new(other.kind(), other.summary()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    Loaded(LoadMetadata),
    Failed(FailureRecord),
}

impl Metadata {
    pub fn success(&self) -> bool {
        match self {
            Metadata::Loaded(meta) => meta.success,
            Metadata::Failed(_) => false,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Metadata::Loaded(_) => None,
            Metadata::Failed(record) => Some(&record.error),
        }
    }

    pub fn loaded(&self) -> Option<&LoadMetadata> {
        match self {
            Metadata::Loaded(meta) => Some(meta),
            Metadata::Failed(_) => None,
        }
    }
}

impl From<LoadMetadata> for Metadata {
    fn from(meta: LoadMetadata) -> Self {
        Metadata::Loaded(meta)
    }
}

impl From<FailureRecord> for Metadata {
    fn from(record: FailureRecord) -> Self {
        Metadata::Failed(record)
    }
}

/// Assembles load metadata from the filesystem and the resolved load parameters
pub struct MetadataBuilder;

impl MetadataBuilder {
    /// Device stats are only recorded for accelerators.
    pub fn build(
        path: &Path,
        format: FormatTag,
        device: Device,
        precision: Precision,
        device_stats: Option<DeviceStats>,
    ) -> Result<LoadMetadata, io::Error> {
        let size_bytes = path_size(path)?;
        Ok(LoadMetadata {
            path: path.to_path_buf(),
            format,
            device,
            precision,
            size_bytes,
            size_mb: size_bytes as f64 / (1024.0 * 1024.0),
            success: true,
            device_stats: device_stats.filter(|_| device.is_accelerator()),
            load_time_ms: 0,
            load_id: ArtifactId::new(),
        })
    }
}

/// Size of a file, or the recursive size of the regular files under a directory
fn path_size(path: &Path) -> Result<u64, io::Error> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }

    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

use crate::types::FormatTag;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving a request into a loaded artifact
#[derive(Debug, Error)]
pub enum LoadError {
    /// The requested path does not reference an existing filesystem entry
    #[error("Model file not found: {}\n📁 Verify the path is correct and the file or directory is readable", .0.display())]
    FileNotFound(PathBuf),

    /// The format-specific configuration text is not a JSON object
    #[error("Config parse error: {0}\n⚙️ Model config must be a JSON object, e.g. {{\"key\": \"value\"}}")]
    ConfigParse(String),

    /// No loader handles the requested format
    #[error("Unsupported model type: {0}\n🧩 Use one of safetensors, checkpoint, pipeline, inference-session")]
    UnsupportedFormat(String),

    /// The runtime library needed by a loader is not available in this build
    #[error("{dependency} is not available for {format} models\n📦 Rebuild with the `{dependency}` feature enabled")]
    DependencyMissing {
        format: FormatTag,
        dependency: &'static str,
    },

    /// The loader ran but could not decode or construct the artifact
    #[error("{format} load failed: {message}\n🔧 Verify file integrity and that the file matches the selected model type")]
    LoadFailure { format: FormatTag, message: String },

    /// Invalid engine configuration or request field
    #[error("Invalid config: {0}\n⚙️ Check engine settings and request fields")]
    InvalidConfig(String),

    /// The handle's cache entry was removed, overwritten or cleared
    #[error("Artifact handle released: its cache entry is no longer present\n🔁 Request the model again")]
    HandleReleased,

    /// I/O error during file operations
    #[error("I/O error: {0}\n💾 Check file permissions and storage availability")]
    Io(#[from] std::io::Error),
}

/// Serializable tag identifying the class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileNotFound,
    ConfigParse,
    UnsupportedFormat,
    DependencyMissing,
    LoadFailure,
    InvalidConfig,
    HandleReleased,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::ConfigParse => "config_parse",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::DependencyMissing => "dependency_missing",
            ErrorKind::LoadFailure => "load_failure",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::HandleReleased => "handle_released",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LoadError {
    /// Create a load failure for the given format
    pub fn load_failure(format: FormatTag, message: impl Into<String>) -> Self {
        Self::LoadFailure {
            format,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::FileNotFound(_) => ErrorKind::FileNotFound,
            LoadError::ConfigParse(_) => ErrorKind::ConfigParse,
            LoadError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            LoadError::DependencyMissing { .. } => ErrorKind::DependencyMissing,
            LoadError::LoadFailure { .. } => ErrorKind::LoadFailure,
            LoadError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            LoadError::HandleReleased => ErrorKind::HandleReleased,
            LoadError::Io(_) => ErrorKind::Io,
        }
    }

    /// First line of the display text, without the remediation hint
    pub fn summary(&self) -> String {
        let text = self.to_string();
        text.lines().next().unwrap_or_default().to_string()
    }

    /// Check if retrying the same request may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LoadError::DependencyMissing { .. } | LoadError::Io(_) | LoadError::LoadFailure { .. }
        )
    }
}

/// Failures inside the optimization pass. These never leave the pass.
#[derive(Debug, Error)]
pub enum OptimizationError {
    #[error("tensor '{tensor}' has values outside half precision range")]
    HalfOverflow { tensor: String },

    #[error("{capability} is not supported by {artifact} artifacts")]
    Unsupported {
        capability: &'static str,
        artifact: &'static str,
    },
}

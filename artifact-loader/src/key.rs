use crate::config::ArtifactConfig;
use crate::types::{DevicePreference, PrecisionPreference};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Deterministic digest of (normalized path, device, precision, config)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from the requested (not resolved) device and precision.
    ///
    /// Each field is length-prefixed before hashing so that no two distinct
    /// field tuples share a byte stream.
    pub fn build(
        path: &Path,
        device: DevicePreference,
        precision: PrecisionPreference,
        config: &ArtifactConfig,
    ) -> Self {
        let fields = [
            path.to_string_lossy().into_owned(),
            device.to_string(),
            precision.to_string(),
            config.canonical(),
        ];

        let mut hasher = Sha256::new();
        for field in &fields {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }

        let result = hasher.finalize();
        Self(format!("{:x}", result))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

use crate::config::EngineConfig;
use crate::types::FormatTag;
use std::path::Path;
use tracing::debug;

/// Infers an artifact's encoding from the shape of its path.
///
/// Detection never fails: anything unrecognized maps to the fallback format
/// (`checkpoint` by default), leaving the loader to report a decode failure.
#[derive(Debug, Clone)]
pub struct FormatDetector {
    index_markers: Vec<String>,
    fallback: FormatTag,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl FormatDetector {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            index_markers: config.index_markers.clone(),
            fallback: config.fallback_format,
        }
    }

    /// Detect the format of `path`. Rules, in priority order:
    /// `.safetensors`, then `.ckpt`/`.pth`/`.pt`, then `.onnx`, then a
    /// directory holding an index marker, then the fallback.
    pub fn detect(&self, path: &Path) -> FormatTag {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

        let detected = match extension.as_deref() {
            Some("safetensors") => FormatTag::Safetensors,
            Some("ckpt") | Some("pth") | Some("pt") => FormatTag::Checkpoint,
            Some("onnx") => FormatTag::InferenceSession,
            _ if path.is_dir() && self.find_index_marker(path).is_some() => FormatTag::Pipeline,
            _ => self.fallback,
        };

        debug!("Detected format {} for {}", detected, path.display());
        detected
    }

    /// Name of the first index marker present in `dir`, if any
    pub fn find_index_marker(&self, dir: &Path) -> Option<&str> {
        self.index_markers
            .iter()
            .find(|marker| dir.join(marker.as_str()).is_file())
            .map(String::as_str)
    }
}

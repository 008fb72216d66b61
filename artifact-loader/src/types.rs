use crate::artifact::ArtifactHandle;
use crate::config::ArtifactConfig;
use crate::error::LoadError;
use crate::key::CacheKey;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use ulid::Ulid;

/// Identifies one completed load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(Ulid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoding of an artifact on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatTag {
    Safetensors,
    Checkpoint,
    Pipeline,
    InferenceSession,
}

impl FormatTag {
    pub const ALL: [FormatTag; 4] = [
        FormatTag::Safetensors,
        FormatTag::Checkpoint,
        FormatTag::Pipeline,
        FormatTag::InferenceSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Safetensors => "safetensors",
            FormatTag::Checkpoint => "checkpoint",
            FormatTag::Pipeline => "pipeline",
            FormatTag::InferenceSession => "inference-session",
        }
    }
}

impl std::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safetensors" => Ok(FormatTag::Safetensors),
            "checkpoint" | "ckpt" => Ok(FormatTag::Checkpoint),
            "pipeline" | "diffusers" => Ok(FormatTag::Pipeline),
            "inference-session" | "onnx" => Ok(FormatTag::InferenceSession),
            other => Err(LoadError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl TryFrom<String> for FormatTag {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FormatTag> for String {
    fn from(tag: FormatTag) -> Self {
        tag.as_str().to_string()
    }
}

/// Requested format: detected from the path, or given explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatHint {
    #[default]
    Auto,
    Explicit(FormatTag),
}

impl std::fmt::Display for FormatHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatHint::Auto => f.write_str("auto"),
            FormatHint::Explicit(tag) => tag.fmt(f),
        }
    }
}

impl FromStr for FormatHint {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(FormatHint::Auto)
        } else {
            Ok(FormatHint::Explicit(s.parse()?))
        }
    }
}

impl TryFrom<String> for FormatHint {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FormatHint> for String {
    fn from(hint: FormatHint) -> Self {
        hint.to_string()
    }
}

/// Kind of accelerator an artifact can be placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorKind {
    /// Primary accelerator (discrete GPU)
    Cuda,
    /// Secondary accelerator (integrated Apple GPU)
    Metal,
}

/// Resolved execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    Cpu,
    Accelerator(AcceleratorKind),
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Accelerator(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Accelerator(AcceleratorKind::Cuda) => "cuda",
            Device::Accelerator(AcceleratorKind::Metal) => "metal",
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<DevicePreference>()? {
            DevicePreference::Cpu => Ok(Device::Cpu),
            DevicePreference::Accelerator(kind) => Ok(Device::Accelerator(kind)),
            DevicePreference::Auto => Err(LoadError::InvalidConfig(
                "'auto' is a preference, not a device".to_string(),
            )),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.as_str().to_string()
    }
}

/// Device requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Accelerator(AcceleratorKind),
}

impl std::fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DevicePreference::Auto => f.write_str("auto"),
            DevicePreference::Cpu => f.write_str("cpu"),
            DevicePreference::Accelerator(kind) => Device::Accelerator(*kind).fmt(f),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "accelerator" | "cuda" | "gpu" => {
                Ok(DevicePreference::Accelerator(AcceleratorKind::Cuda))
            }
            "mps" | "metal" => Ok(DevicePreference::Accelerator(AcceleratorKind::Metal)),
            other => Err(LoadError::InvalidConfig(format!("Unknown device: {}", other))),
        }
    }
}

impl TryFrom<String> for DevicePreference {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DevicePreference> for String {
    fn from(preference: DevicePreference) -> Self {
        preference.to_string()
    }
}

/// Numeric representation of tensor values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Precision {
    Float32,
    Float16,
    BFloat16,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Float32 => "float32",
            Precision::Float16 => "float16",
            Precision::BFloat16 => "bfloat16",
        }
    }

    /// Bytes per element
    pub fn size_of(&self) -> usize {
        match self {
            Precision::Float32 => 4,
            Precision::Float16 | Precision::BFloat16 => 2,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float32" | "fp32" | "f32" => Ok(Precision::Float32),
            "float16" | "fp16" | "f16" | "half" => Ok(Precision::Float16),
            "bfloat16" | "bf16" => Ok(Precision::BFloat16),
            other => Err(LoadError::InvalidConfig(format!(
                "Unknown precision: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Precision {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Precision> for String {
    fn from(precision: Precision) -> Self {
        precision.as_str().to_string()
    }
}

/// Precision requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PrecisionPreference {
    #[default]
    Auto,
    Explicit(Precision),
}

impl std::fmt::Display for PrecisionPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrecisionPreference::Auto => f.write_str("auto"),
            PrecisionPreference::Explicit(precision) => precision.fmt(f),
        }
    }
}

impl FromStr for PrecisionPreference {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(PrecisionPreference::Auto)
        } else {
            Ok(PrecisionPreference::Explicit(s.parse()?))
        }
    }
}

impl TryFrom<String> for PrecisionPreference {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PrecisionPreference> for String {
    fn from(preference: PrecisionPreference) -> Self {
        preference.to_string()
    }
}

fn default_true() -> bool {
    true
}

/// A request to load (or fetch from cache) one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    /// Path to the model file or pipeline directory
    pub path: PathBuf,
    #[serde(default)]
    pub format: FormatHint,
    #[serde(default)]
    pub device: DevicePreference,
    #[serde(default)]
    pub precision: PrecisionPreference,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_true")]
    pub optimize: bool,
    /// Format-specific configuration as JSON object text
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub force_reload: bool,
}

impl ArtifactRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: FormatHint::Auto,
            device: DevicePreference::Auto,
            precision: PrecisionPreference::Auto,
            cache_enabled: true,
            optimize: true,
            config: String::new(),
            force_reload: false,
        }
    }

    pub fn with_format(mut self, format: FormatHint) -> Self {
        self.format = format;
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    pub fn with_precision(mut self, precision: PrecisionPreference) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_cache_enabled(mut self, cache_enabled: bool) -> Self {
        self.cache_enabled = cache_enabled;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_force_reload(mut self, force_reload: bool) -> Self {
        self.force_reload = force_reload;
        self
    }

    /// Whether the path references an existing filesystem entry
    pub fn path_exists(&self) -> bool {
        !self.path.as_os_str().is_empty() && self.path.exists()
    }

    /// Canonical form of the path, used for keying
    pub fn normalized_path(&self) -> Result<PathBuf, LoadError> {
        if !self.path_exists() {
            return Err(LoadError::FileNotFound(self.path.clone()));
        }
        Ok(normalize_path(&self.path))
    }

    /// Derive the cache key for this request.
    ///
    /// Only the normalized path, the requested device, the requested precision
    /// and the canonical config take part.
    pub fn cache_key(&self) -> Result<CacheKey, LoadError> {
        let path = self.normalized_path()?;
        let config = ArtifactConfig::parse_lenient(&self.config);
        Ok(CacheKey::build(&path, self.device, self.precision, &config))
    }
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The triple handed back to the host for every request
#[derive(Debug, Clone)]
pub struct LoadResponse {
    pub artifact: Option<ArtifactHandle>,
    pub info: String,
    pub metadata: Metadata,
    /// True when served from the cache without invoking a loader
    pub from_cache: bool,
}

impl LoadResponse {
    pub fn is_success(&self) -> bool {
        self.metadata.success()
    }

    pub fn into_parts(self) -> (Option<ArtifactHandle>, String, Metadata) {
        (self.artifact, self.info, self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tag_parsing() {
        assert_eq!("safetensors".parse::<FormatTag>().unwrap(), FormatTag::Safetensors);
        assert_eq!("onnx".parse::<FormatTag>().unwrap(), FormatTag::InferenceSession);
        assert_eq!("diffusers".parse::<FormatTag>().unwrap(), FormatTag::Pipeline);
        assert!(matches!(
            "gguf".parse::<FormatTag>(),
            Err(LoadError::UnsupportedFormat(_))
        ));
        assert_eq!(
            "inference-session".parse::<FormatHint>().unwrap(),
            FormatHint::Explicit(FormatTag::InferenceSession)
        );
        assert_eq!("AUTO".parse::<FormatHint>().unwrap(), FormatHint::Auto);
    }

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!(
            "accelerator".parse::<DevicePreference>().unwrap(),
            DevicePreference::Accelerator(AcceleratorKind::Cuda)
        );
        assert_eq!(
            "cuda".parse::<DevicePreference>().unwrap(),
            "accelerator".parse::<DevicePreference>().unwrap()
        );
        assert_eq!(
            "mps".parse::<DevicePreference>().unwrap(),
            DevicePreference::Accelerator(AcceleratorKind::Metal)
        );
        assert!("tpu".parse::<DevicePreference>().is_err());
        assert!("auto".parse::<Device>().is_err());
    }

    #[test]
    fn test_precision_parsing() {
        assert_eq!("fp16".parse::<Precision>().unwrap(), Precision::Float16);
        assert_eq!("bf16".parse::<Precision>().unwrap(), Precision::BFloat16);
        assert_eq!(
            "auto".parse::<PrecisionPreference>().unwrap(),
            PrecisionPreference::Auto
        );
        assert!("int8".parse::<PrecisionPreference>().is_err());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: ArtifactRequest =
            serde_json::from_str(r#"{"path": "/models/x.ckpt"}"#).unwrap();
        assert_eq!(request, ArtifactRequest::new("/models/x.ckpt"));
        assert!(request.cache_enabled);
        assert!(request.optimize);
        assert!(!request.force_reload);
        assert_eq!(request.format, FormatHint::Auto);
    }

    #[test]
    fn test_request_enums_from_json() {
        let request: ArtifactRequest = serde_json::from_str(
            r#"{"path": "m.onnx", "format": "inference-session", "device": "cpu", "precision": "bfloat16"}"#,
        )
        .unwrap();
        assert_eq!(request.format, FormatHint::Explicit(FormatTag::InferenceSession));
        assert_eq!(request.device, DevicePreference::Cpu);
        assert_eq!(
            request.precision,
            PrecisionPreference::Explicit(Precision::BFloat16)
        );

        let bad = serde_json::from_str::<ArtifactRequest>(r#"{"path": "m", "device": "tpu"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_missing_path_has_no_key() {
        let request = ArtifactRequest::new("/no/such/model.ckpt");
        assert!(!request.path_exists());
        assert!(matches!(
            request.cache_key(),
            Err(LoadError::FileNotFound(_))
        ));
        assert!(!ArtifactRequest::new("").path_exists());
    }
}

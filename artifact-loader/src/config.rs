//! # Configuration
//!
//! Two kinds of configuration live here: [`ArtifactConfig`], the opaque
//! format-specific mapping a caller attaches to a request, and
//! [`EngineConfig`], the settings of the engine itself.

use crate::error::LoadError;
use crate::types::FormatTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

const DEFAULT_INDEX_MARKER: &str = "model_index.json";

/// Format-specific key/value configuration attached to a request.
///
/// Keys are held sorted so the canonical rendering does not depend on the
/// order fields appeared in the caller's text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig(BTreeMap<String, Value>);

impl ArtifactConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config text. Empty or whitespace-only text is the empty config.
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Self(map.into_iter().collect())),
            Ok(other) => Err(LoadError::ConfigParse(format!(
                "expected a JSON object, found {}",
                json_type_name(&other)
            ))),
            Err(e) => Err(LoadError::ConfigParse(e.to_string())),
        }
    }

    /// Parse config text, degrading malformed input to the empty config
    pub fn parse_lenient(text: &str) -> Self {
        match Self::parse(text) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring malformed model config, using empty config: {}", e);
                Self::default()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlay `other` on top of `self`; keys in `other` win
    pub fn merged_with(&self, other: &ArtifactConfig) -> ArtifactConfig {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }

    /// Stable text rendering used for hashing.
    ///
    /// Object keys are sorted at every depth and integral floats render as
    /// integers, so `{"b": 1.0, "a": [2]}` and `{"a":[2],"b":1}` agree.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        out.push('{');
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_canonical_string(key, &mut out);
            out.push(':');
            write_canonical(value, &mut out);
        }
        out.push('}');
        out
    }
}

impl FromIterator<(String, Value)> for ArtifactConfig {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_canonical_number(n, out),
        Value::String(s) => write_canonical_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_string(key, out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_canonical_number(n: &serde_json::Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        // Integral floats render like the integer with the same value
        const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
        const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;
        if f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f) {
            out.push_str(&(f as i64).to_string());
        } else if f.fract() == 0.0 && (0.0..U64_BOUND).contains(&f) {
            out.push_str(&(f as u64).to_string());
        } else {
            out.push_str(&n.to_string());
        }
    } else {
        out.push_str(&n.to_string());
    }
}

fn write_canonical_string(s: &str, out: &mut String) {
    // serde_json string escaping is deterministic
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str(&format!("{:?}", s)),
    }
}

fn default_index_markers() -> Vec<String> {
    vec![DEFAULT_INDEX_MARKER.to_string()]
}

fn default_fallback_format() -> FormatTag {
    FormatTag::Checkpoint
}

fn default_kernel_autotune() -> bool {
    true
}

/// Settings of the loading engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// File names whose presence marks a directory as a pipeline
    #[serde(default = "default_index_markers")]
    pub index_markers: Vec<String>,
    /// Format assumed when detection recognizes nothing
    #[serde(default = "default_fallback_format")]
    pub fallback_format: FormatTag,
    /// Let accelerator backends autotune kernels after load
    #[serde(default = "default_kernel_autotune")]
    pub kernel_autotune: bool,
    /// Intra-op thread hint; defaults to the number of logical CPUs
    #[serde(default)]
    pub cpu_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_markers: default_index_markers(),
            fallback_format: default_fallback_format(),
            kernel_autotune: default_kernel_autotune(),
            cpu_threads: None,
        }
    }
}

impl EngineConfig {
    /// Read engine settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            LoadError::InvalidConfig(format!(
                "Failed to parse engine config {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.index_markers.is_empty() {
            return Err(LoadError::InvalidConfig(
                "At least one pipeline index marker is required".to_string(),
            ));
        }

        for marker in &self.index_markers {
            if marker.trim().is_empty() {
                return Err(LoadError::InvalidConfig(
                    "Pipeline index marker cannot be empty".to_string(),
                ));
            }
            if marker.contains('/') || marker.contains('\\') {
                return Err(LoadError::InvalidConfig(format!(
                    "Pipeline index marker must be a bare file name: {}",
                    marker
                )));
            }
        }

        if self.cpu_threads == Some(0) {
            return Err(LoadError::InvalidConfig(
                "cpu_threads must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn effective_cpu_threads(&self) -> usize {
        self.cpu_threads.unwrap_or_else(num_cpus::get)
    }
}

use crate::artifact::{Artifact, Payload};
use crate::error::LoadError;
use crate::loader::{LoadContext, LoadOutput, Loader};
use crate::tensor::TensorMap;
use crate::types::FormatTag;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

const DEPENDENCY: &str = "safetensors";

fn shard_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?P<base>.+)-(?P<index>\d{5})-of-(?P<total>\d{5})\.safetensors$").ok()
        })
        .as_ref()
}

/// All shard paths of a sharded file such as `model-00001-of-00003.safetensors`.
///
/// Returns `None` when `path` is not named like a shard.
pub fn shard_paths(path: &Path) -> Option<Vec<PathBuf>> {
    let filename = path.file_name()?.to_str()?;
    let captures = shard_pattern()?.captures(filename)?;
    let base = captures.name("base")?.as_str();
    let total: usize = captures.name("total")?.as_str().parse().ok()?;
    if total == 0 {
        return None;
    }

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    Some(
        (1..=total)
            .map(|index| dir.join(format!("{}-{:05}-of-{:05}.safetensors", base, index, total)))
            .collect(),
    )
}

/// Loads safetensors containers into a tensor map
#[derive(Debug, Clone)]
pub struct SafetensorsLoader {
    runtime_available: bool,
}

impl Default for SafetensorsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetensorsLoader {
    pub fn new() -> Self {
        Self {
            runtime_available: cfg!(feature = "safetensors"),
        }
    }

    /// A loader on a host without the decoding library
    pub fn unavailable() -> Self {
        Self {
            runtime_available: false,
        }
    }
}

impl Loader for SafetensorsLoader {
    fn format(&self) -> FormatTag {
        FormatTag::Safetensors
    }

    fn load(&self, ctx: &LoadContext) -> Result<LoadOutput, LoadError> {
        if !self.runtime_available {
            return Err(LoadError::DependencyMissing {
                format: FormatTag::Safetensors,
                dependency: DEPENDENCY,
            });
        }

        let paths = shard_paths(&ctx.path).unwrap_or_else(|| vec![ctx.path.clone()]);
        if paths.len() > 1 {
            info!("Loading sharded safetensors model with {} parts", paths.len());
        }

        let mut map = TensorMap::new();
        for path in &paths {
            if !path.is_file() {
                let message = if paths.len() > 1 {
                    format!("missing shard {}", path.display())
                } else {
                    format!("{} is not a file", path.display())
                };
                return Err(LoadError::load_failure(FormatTag::Safetensors, message));
            }
            let bytes = std::fs::read(path).map_err(|e| {
                LoadError::load_failure(
                    FormatTag::Safetensors,
                    format!("failed to read {}: {}", path.display(), e),
                )
            })?;
            decode_into(&bytes, &mut map).map_err(|message| {
                LoadError::load_failure(
                    FormatTag::Safetensors,
                    format!("{}: {}", path.display(), message),
                )
            })?;
            debug!("Decoded {} ({} tensors so far)", path.display(), map.tensor_count());
        }

        let info = if paths.len() > 1 {
            format!(
                "SafeTensors model loaded: {} tensors from {} shards",
                map.tensor_count(),
                paths.len()
            )
        } else {
            format!("SafeTensors model loaded: {} tensors", map.tensor_count())
        };

        Ok(LoadOutput {
            artifact: Artifact::new(Payload::Tensors(map)),
            info,
        })
    }
}

#[cfg(feature = "safetensors")]
fn decode_into(bytes: &[u8], map: &mut TensorMap) -> Result<(), String> {
    use crate::tensor::{Tensor, TensorData};
    use ::safetensors::{Dtype, SafeTensors};
    use half::{bf16, f16};

    let tensors = SafeTensors::deserialize(bytes).map_err(|e| e.to_string())?;
    for (name, view) in tensors.tensors() {
        if map.tensors.contains_key(&name) {
            return Err(format!("duplicate tensor '{}'", name));
        }

        let raw = view.data();
        let data = match view.dtype() {
            Dtype::F32 => TensorData::F32(
                raw.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            Dtype::F16 => TensorData::F16(
                raw.chunks_exact(2)
                    .map(|c| f16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            Dtype::BF16 => TensorData::BF16(
                raw.chunks_exact(2)
                    .map(|c| bf16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            other => TensorData::Opaque {
                dtype: format!("{:?}", other).to_lowercase(),
                bytes: raw.to_vec(),
            },
        };
        map.insert(name, Tensor::new(view.shape().to_vec(), data));
    }
    Ok(())
}

#[cfg(not(feature = "safetensors"))]
fn decode_into(_bytes: &[u8], _map: &mut TensorMap) -> Result<(), String> {
    Err(format!("{} support is not compiled in", DEPENDENCY))
}

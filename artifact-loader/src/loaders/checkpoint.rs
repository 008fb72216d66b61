use crate::artifact::{Artifact, Payload};
use crate::error::LoadError;
use crate::loader::{LoadContext, LoadOutput, Loader};
use crate::tensor::{Tensor, TensorData, TensorMap};
use crate::types::{FormatTag, Precision};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

/// One serialized tensor inside a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TensorRecord {
    pub dtype: Precision,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    fn into_tensor(self, name: &str) -> Result<Tensor, String> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(format!(
                "tensor '{}' has shape {:?} ({} elements) but {} values",
                name,
                self.shape,
                expected,
                self.data.len()
            ));
        }

        let data = match self.dtype {
            Precision::Float32 => TensorData::F32(self.data),
            Precision::Float16 => TensorData::F16(self.data.into_iter().map(f16::from_f32).collect()),
            Precision::BFloat16 => {
                TensorData::BF16(self.data.into_iter().map(bf16::from_f32).collect())
            }
        };
        Ok(Tensor::new(self.shape, data))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CheckpointEntry {
    Tensor(TensorRecord),
    Value(Value),
}

/// Write `map` as a checkpoint file the [`CheckpointLoader`] can read
pub fn write_checkpoint(path: &Path, map: &TensorMap) -> Result<(), LoadError> {
    let mut root = serde_json::Map::new();
    for (name, tensor) in &map.tensors {
        let dtype = tensor.precision().ok_or_else(|| {
            LoadError::load_failure(
                FormatTag::Checkpoint,
                format!(
                    "tensor '{}' of type {} cannot be stored in a checkpoint",
                    name,
                    tensor.dtype_name()
                ),
            )
        })?;
        let record = TensorRecord {
            dtype,
            shape: tensor.shape.clone(),
            data: tensor.to_f32_vec(),
        };
        let value = serde_json::to_value(record)
            .map_err(|e| LoadError::load_failure(FormatTag::Checkpoint, e.to_string()))?;
        root.insert(name.clone(), value);
    }
    for (name, value) in &map.extras {
        root.insert(name.clone(), value.clone());
    }

    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, &Value::Object(root))
        .map_err(|e| LoadError::load_failure(FormatTag::Checkpoint, e.to_string()))
}

/// Loads a generic name-to-tensor state dict and casts it to the target precision
#[derive(Debug, Clone, Default)]
pub struct CheckpointLoader;

impl CheckpointLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for CheckpointLoader {
    fn format(&self) -> FormatTag {
        FormatTag::Checkpoint
    }

    fn load(&self, ctx: &LoadContext) -> Result<LoadOutput, LoadError> {
        let failure = |message: String| LoadError::load_failure(FormatTag::Checkpoint, message);

        let file = File::open(&ctx.path)
            .map_err(|e| failure(format!("failed to open {}: {}", ctx.path.display(), e)))?;
        let entries: BTreeMap<String, CheckpointEntry> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                failure(format!(
                    "failed to decode {}: {}",
                    ctx.path.display(),
                    e
                ))
            })?;

        let mut map = TensorMap::new();
        for (name, entry) in entries {
            match entry {
                CheckpointEntry::Tensor(record) => {
                    let tensor = record.into_tensor(&name).map_err(failure)?;
                    map.insert(name, tensor.cast(ctx.precision));
                }
                CheckpointEntry::Value(value) => {
                    map.extras.insert(name, value);
                }
            }
        }

        debug!(
            "Checkpoint {} holds {} tensors and {} other entries",
            ctx.path.display(),
            map.tensor_count(),
            map.extras.len()
        );

        let info = format!("Checkpoint loaded with {} keys", map.entry_count());
        Ok(LoadOutput {
            artifact: Artifact::new(Payload::Tensors(map)),
            info,
        })
    }
}

//! In-memory tensors produced by the tensor-map loaders.

use crate::types::Precision;
use half::{bf16, f16};
use serde_json::Value;
use std::collections::BTreeMap;

/// Element storage of a tensor
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    /// Non-float element types are carried as raw little-endian bytes
    Opaque { dtype: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: TensorData) -> Self {
        Self { shape, data }
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self::new(shape, TensorData::F32(values))
    }

    /// Number of elements implied by the shape
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Float precision of the elements, `None` for opaque tensors
    pub fn precision(&self) -> Option<Precision> {
        match &self.data {
            TensorData::F32(_) => Some(Precision::Float32),
            TensorData::F16(_) => Some(Precision::Float16),
            TensorData::BF16(_) => Some(Precision::BFloat16),
            TensorData::Opaque { .. } => None,
        }
    }

    pub fn dtype_name(&self) -> &str {
        match &self.data {
            TensorData::F32(_) => "float32",
            TensorData::F16(_) => "float16",
            TensorData::BF16(_) => "bfloat16",
            TensorData::Opaque { dtype, .. } => dtype,
        }
    }

    pub fn byte_size(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len() * 4,
            TensorData::F16(v) => v.len() * 2,
            TensorData::BF16(v) => v.len() * 2,
            TensorData::Opaque { bytes, .. } => bytes.len(),
        }
    }

    /// Element values widened to f32; empty for opaque tensors
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(v) => v.clone(),
            TensorData::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorData::BF16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorData::Opaque { .. } => Vec::new(),
        }
    }

    /// Convert float elements to `precision`. Opaque tensors are returned as is.
    pub fn cast(&self, precision: Precision) -> Tensor {
        if self.precision().is_none() || self.precision() == Some(precision) {
            return self.clone();
        }

        let values = self.to_f32_vec();
        let data = match precision {
            Precision::Float32 => TensorData::F32(values),
            Precision::Float16 => TensorData::F16(values.into_iter().map(f16::from_f32).collect()),
            Precision::BFloat16 => {
                TensorData::BF16(values.into_iter().map(bf16::from_f32).collect())
            }
        };
        Tensor::new(self.shape.clone(), data)
    }

    /// Convert to half precision, refusing when a finite value would overflow
    pub fn to_half_checked(&self) -> Option<Tensor> {
        match &self.data {
            TensorData::F16(_) | TensorData::Opaque { .. } => Some(self.clone()),
            _ => {
                let values = self.to_f32_vec();
                let mut halves = Vec::with_capacity(values.len());
                for value in values {
                    let half = f16::from_f32(value);
                    if value.is_finite() && !half.is_finite() {
                        return None;
                    }
                    halves.push(half);
                }
                Some(Tensor::new(self.shape.clone(), TensorData::F16(halves)))
            }
        }
    }
}

/// Named tensors plus any non-tensor entries found alongside them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorMap {
    pub tensors: BTreeMap<String, Tensor>,
    pub extras: BTreeMap<String, Value>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Tensors and extras together
    pub fn entry_count(&self) -> usize {
        self.tensors.len() + self.extras.len()
    }

    pub fn byte_size(&self) -> usize {
        self.tensors.values().map(Tensor::byte_size).sum()
    }

    pub fn cast(&self, precision: Precision) -> TensorMap {
        TensorMap {
            tensors: self
                .tensors
                .iter()
                .map(|(name, tensor)| (name.clone(), tensor.cast(precision)))
                .collect(),
            extras: self.extras.clone(),
        }
    }
}

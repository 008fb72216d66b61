//! Best-effort post-load transformations.
//!
//! Every step may be skipped or fail without affecting the load: failures are
//! logged and the artifact is returned in whatever state it reached.

use crate::artifact::{Artifact, ExecutionHints, Payload};
use crate::config::EngineConfig;
use crate::error::OptimizationError;
use crate::tensor::TensorMap;
use crate::types::{Device, Precision};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizationPass {
    kernel_autotune: bool,
    cpu_threads: usize,
}

impl OptimizationPass {
    pub fn new(kernel_autotune: bool, cpu_threads: usize) -> Self {
        Self {
            kernel_autotune,
            cpu_threads,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.kernel_autotune, config.effective_cpu_threads())
    }

    /// Apply all optimizations that `artifact` supports on `device`.
    ///
    /// The half downcast runs only on accelerators when `precision` is
    /// float16; a wider precision the caller pinned is kept.
    pub fn apply(
        &self,
        mut artifact: Artifact,
        device: Device,
        precision: Precision,
    ) -> Artifact {
        if let Err(e) = enter_inference_mode(&mut artifact) {
            debug!("Skipping inference mode: {}", e);
        }

        if device.is_accelerator() && precision == Precision::Float16 {
            if let Err(e) = downcast_to_half(&mut artifact) {
                warn!("Half precision downcast skipped: {}", e);
            }
        }

        artifact.execution = ExecutionHints {
            kernel_autotune: self.kernel_autotune && device.is_accelerator(),
            intra_op_threads: self.cpu_threads,
        };
        debug!(
            "Optimized {} for {} (autotune: {}, threads: {})",
            artifact.payload.kind_name(),
            device,
            artifact.execution.kernel_autotune,
            artifact.execution.intra_op_threads
        );

        artifact
    }
}

fn enter_inference_mode(artifact: &mut Artifact) -> Result<(), OptimizationError> {
    match &mut artifact.payload {
        Payload::Pipeline(pipeline) => {
            pipeline.inference_mode = true;
            Ok(())
        }
        other => Err(OptimizationError::Unsupported {
            capability: "inference mode",
            artifact: other.kind_name(),
        }),
    }
}

fn downcast_to_half(artifact: &mut Artifact) -> Result<(), OptimizationError> {
    match &mut artifact.payload {
        Payload::Tensors(map) => {
            *map = half_tensor_map(map)?;
            Ok(())
        }
        Payload::Pipeline(pipeline) => {
            pipeline.precision = Precision::Float16;
            Ok(())
        }
        other => Err(OptimizationError::Unsupported {
            capability: "half precision",
            artifact: other.kind_name(),
        }),
    }
}

/// All-or-nothing: a single overflowing tensor leaves the map untouched
fn half_tensor_map(map: &TensorMap) -> Result<TensorMap, OptimizationError> {
    let mut converted = TensorMap {
        tensors: Default::default(),
        extras: map.extras.clone(),
    };
    for (name, tensor) in &map.tensors {
        let half = tensor
            .to_half_checked()
            .ok_or_else(|| OptimizationError::HalfOverflow {
                tensor: name.clone(),
            })?;
        converted.insert(name.clone(), half);
    }
    Ok(converted)
}

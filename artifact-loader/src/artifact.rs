//! Loaded artifacts and the handles callers hold on to.

use crate::config::ArtifactConfig;
use crate::error::LoadError;
use crate::tensor::{Tensor, TensorMap};
use crate::types::{ArtifactId, Device, Precision};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One declared pipeline component, e.g. `unet: ["diffusers", "UNet2DConditionModel"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineComponent {
    pub library: String,
    pub class_name: String,
}

/// A multi-component pipeline assembled from a directory
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub class_name: String,
    pub components: BTreeMap<String, PipelineComponent>,
    /// Construction parameters: index entries overlaid with caller config
    pub params: ArtifactConfig,
    pub precision: Precision,
    pub device: Device,
    pub inference_mode: bool,
}

/// A graph ready for inference
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSession {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub producer: String,
    pub ir_version: i64,
    pub options: ArtifactConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Tensors(TensorMap),
    Pipeline(Pipeline),
    Session(InferenceSession),
}

impl Payload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Tensors(_) => "tensor map",
            Payload::Pipeline(_) => "pipeline",
            Payload::Session(_) => "inference session",
        }
    }
}

/// Backend execution flags set by the optimization pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionHints {
    pub kernel_autotune: bool,
    pub intra_op_threads: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub payload: Payload,
    pub execution: ExecutionHints,
}

impl Artifact {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            execution: ExecutionHints::default(),
        }
    }

    pub fn tensors(&self) -> Option<&TensorMap> {
        match &self.payload {
            Payload::Tensors(map) => Some(map),
            _ => None,
        }
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        match &self.payload {
            Payload::Pipeline(pipeline) => Some(pipeline),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&InferenceSession> {
        match &self.payload {
            Payload::Session(session) => Some(session),
            _ => None,
        }
    }

    /// Precision the payload is held in.
    ///
    /// `None` for sessions and for tensor maps without float tensors or with
    /// mixed float precisions.
    pub fn precision(&self) -> Option<Precision> {
        match &self.payload {
            Payload::Tensors(map) => {
                let mut precisions = map.tensors.values().filter_map(Tensor::precision);
                let first = precisions.next()?;
                precisions.all(|p| p == first).then_some(first)
            }
            Payload::Pipeline(pipeline) => Some(pipeline.precision),
            Payload::Session(_) => None,
        }
    }
}

/// Shared reference to a loaded artifact.
///
/// A handle served from the cache stays valid only while its entry is in the
/// table; removing, overwriting or clearing the entry releases it.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    id: ArtifactId,
    artifact: Arc<Artifact>,
    live: Arc<AtomicBool>,
}

impl ArtifactHandle {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            id: ArtifactId::new(),
            artifact: Arc::new(artifact),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Access the artifact, failing once the handle has been released
    pub fn artifact(&self) -> Result<&Artifact, LoadError> {
        if self.is_live() {
            Ok(&self.artifact)
        } else {
            Err(LoadError::HandleReleased)
        }
    }

    pub(crate) fn release(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl PartialEq for ArtifactHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.artifact, &other.artifact)
    }
}

impl Eq for ArtifactHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_artifact() -> Artifact {
        let mut map = TensorMap::new();
        map.insert("w", Tensor::from_f32(vec![1], vec![1.0]));
        Artifact::new(Payload::Tensors(map))
    }

    #[test]
    fn test_handle_identity() {
        let a = ArtifactHandle::new(tensor_artifact());
        let b = a.clone();
        let c = ArtifactHandle::new(tensor_artifact());
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        // Equal contents, different loads
        assert_ne!(a, c);
    }

    #[test]
    fn test_payload_precision() {
        assert_eq!(tensor_artifact().precision(), Some(Precision::Float32));

        let mut mixed = TensorMap::new();
        mixed.insert("a", Tensor::from_f32(vec![1], vec![1.0]));
        mixed.insert("b", Tensor::from_f32(vec![1], vec![1.0]).cast(Precision::Float16));
        assert_eq!(Artifact::new(Payload::Tensors(mixed)).precision(), None);
        assert_eq!(Artifact::new(Payload::Tensors(TensorMap::new())).precision(), None);
    }

    #[test]
    fn test_release_invalidates_all_clones() {
        let a = ArtifactHandle::new(tensor_artifact());
        let b = a.clone();
        assert!(a.artifact().is_ok());

        a.release();
        assert!(!b.is_live());
        assert!(matches!(b.artifact(), Err(LoadError::HandleReleased)));
    }

    #[test]
    fn test_payload_accessors() {
        let artifact = tensor_artifact();
        assert!(artifact.tensors().is_some());
        assert!(artifact.pipeline().is_none());
        assert!(artifact.session().is_none());
        assert_eq!(artifact.payload.kind_name(), "tensor map");
    }
}

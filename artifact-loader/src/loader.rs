use crate::artifact::Artifact;
use crate::config::{ArtifactConfig, EngineConfig};
use crate::error::LoadError;
use crate::loaders::{CheckpointLoader, PipelineLoader, SafetensorsLoader, SessionLoader};
use crate::types::{Device, FormatTag, Precision};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Everything a loader needs to materialize one artifact
#[derive(Debug, Clone, PartialEq)]
pub struct LoadContext {
    pub path: PathBuf,
    pub device: Device,
    pub precision: Precision,
    pub config: ArtifactConfig,
}

/// A freshly loaded artifact and a human-readable description of it
#[derive(Debug)]
pub struct LoadOutput {
    pub artifact: Artifact,
    pub info: String,
}

/// Format-specific capability that turns a path into an artifact.
///
/// Loaders are blocking and must not hand back partially-built artifacts:
/// any failure surfaces as an error with nothing returned.
#[cfg_attr(test, mockall::automock)]
pub trait Loader: Send + Sync {
    fn format(&self) -> FormatTag;

    fn load(&self, ctx: &LoadContext) -> Result<LoadOutput, LoadError>;
}

/// Maps each format tag to the loader that handles it
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: BTreeMap<FormatTag, Box<dyn Loader>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

impl LoaderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with one loader per known format
    pub fn with_default_loaders(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SafetensorsLoader::new()));
        registry.register(Box::new(CheckpointLoader::new()));
        registry.register(Box::new(PipelineLoader::new(config.index_markers.clone())));
        registry.register(Box::new(SessionLoader::new()));
        registry
    }

    /// Register a loader, replacing any loader already bound to its format
    pub fn register(&mut self, loader: Box<dyn Loader>) -> Option<Box<dyn Loader>> {
        let format = loader.format();
        debug!("Registering loader for {}", format);
        self.loaders.insert(format, loader)
    }

    pub fn formats(&self) -> Vec<FormatTag> {
        self.loaders.keys().copied().collect()
    }

    pub fn supports(&self, format: FormatTag) -> bool {
        self.loaders.contains_key(&format)
    }

    pub fn dispatch(&self, format: FormatTag, ctx: &LoadContext) -> Result<LoadOutput, LoadError> {
        let loader = self
            .loaders
            .get(&format)
            .ok_or_else(|| LoadError::UnsupportedFormat(format.to_string()))?;

        debug!(
            "Dispatching {} load for {} on {} as {}",
            format,
            ctx.path.display(),
            ctx.device,
            ctx.precision
        );
        loader.load(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Payload;
    use crate::tensor::TensorMap;

    fn context() -> LoadContext {
        LoadContext {
            path: PathBuf::from("/models/a.ckpt"),
            device: Device::Cpu,
            precision: Precision::Float32,
            config: ArtifactConfig::new(),
        }
    }

    #[test]
    fn test_dispatch_to_registered_loader() {
        let mut loader = MockLoader::new();
        loader.expect_format().return_const(FormatTag::Checkpoint);
        loader
            .expect_load()
            .withf(|ctx| ctx.device == Device::Cpu)
            .times(1)
            .returning(|_| {
                Ok(LoadOutput {
                    artifact: Artifact::new(Payload::Tensors(TensorMap::new())),
                    info: "Checkpoint loaded with 0 keys".to_string(),
                })
            });

        let mut registry = LoaderRegistry::new();
        registry.register(Box::new(loader));

        let output = registry.dispatch(FormatTag::Checkpoint, &context()).unwrap();
        assert_eq!(output.info, "Checkpoint loaded with 0 keys");
    }

    #[test]
    fn test_dispatch_unknown_format() {
        let registry = LoaderRegistry::new();
        let result = registry.dispatch(FormatTag::Pipeline, &context());
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(f)) if f == "pipeline"));
    }

    #[test]
    fn test_default_registry_covers_all_formats() {
        let registry = LoaderRegistry::with_default_loaders(&EngineConfig::default());
        assert_eq!(registry.formats(), FormatTag::ALL.to_vec());
        for format in FormatTag::ALL {
            assert!(registry.supports(format));
        }
    }

    #[test]
    fn test_register_replaces_existing_loader() {
        let mut registry = LoaderRegistry::with_default_loaders(&EngineConfig::default());
        let replaced = registry.register(Box::new(PipelineLoader::unavailable()));
        assert!(replaced.is_some());

        let mut ctx = context();
        ctx.path = PathBuf::from("/models/pipeline");
        let result = registry.dispatch(FormatTag::Pipeline, &ctx);
        assert!(matches!(result, Err(LoadError::DependencyMissing { .. })));
    }
}

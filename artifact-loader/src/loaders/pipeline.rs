use crate::artifact::{Artifact, Payload, Pipeline, PipelineComponent};
use crate::config::ArtifactConfig;
use crate::error::LoadError;
use crate::loader::{LoadContext, LoadOutput, Loader};
use crate::types::FormatTag;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const DEPENDENCY: &str = "pipeline";
const DEFAULT_CLASS_NAME: &str = "DiffusionPipeline";

/// Assembles a multi-component pipeline from a directory with an index file
#[derive(Debug, Clone)]
pub struct PipelineLoader {
    index_markers: Vec<String>,
    runtime_available: bool,
}

impl Default for PipelineLoader {
    fn default() -> Self {
        Self::new(vec!["model_index.json".to_string()])
    }
}

impl PipelineLoader {
    pub fn new(index_markers: Vec<String>) -> Self {
        Self {
            index_markers,
            runtime_available: cfg!(feature = "pipeline"),
        }
    }

    /// A loader on a host without the pipeline runtime
    pub fn unavailable() -> Self {
        Self {
            runtime_available: false,
            ..Self::default()
        }
    }

    fn read_index(&self, dir: &Path) -> Result<serde_json::Map<String, Value>, LoadError> {
        let failure = |message: String| LoadError::load_failure(FormatTag::Pipeline, message);

        if !dir.is_dir() {
            return Err(failure(format!(
                "{} is not a pipeline directory",
                dir.display()
            )));
        }

        let index_path = self
            .index_markers
            .iter()
            .map(|marker| dir.join(marker))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                failure(format!(
                    "no index file ({}) in {}",
                    self.index_markers.join(", "),
                    dir.display()
                ))
            })?;

        let content = std::fs::read_to_string(&index_path)
            .map_err(|e| failure(format!("failed to read {}: {}", index_path.display(), e)))?;
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(index)) => Ok(index),
            Ok(_) => Err(failure(format!(
                "{} must contain a JSON object",
                index_path.display()
            ))),
            Err(e) => Err(failure(format!(
                "failed to parse {}: {}",
                index_path.display(),
                e
            ))),
        }
    }
}

/// `["library", "ClassName"]` declares a component; `[null, null]` declares an absent one
fn component_spec(value: &Value) -> Option<Option<PipelineComponent>> {
    let items = value.as_array()?;
    if items.len() != 2 {
        return None;
    }
    match (&items[0], &items[1]) {
        (Value::String(library), Value::String(class_name)) => Some(Some(PipelineComponent {
            library: library.clone(),
            class_name: class_name.clone(),
        })),
        (Value::Null, Value::Null) => Some(None),
        _ => None,
    }
}

impl Loader for PipelineLoader {
    fn format(&self) -> FormatTag {
        FormatTag::Pipeline
    }

    fn load(&self, ctx: &LoadContext) -> Result<LoadOutput, LoadError> {
        if !self.runtime_available {
            return Err(LoadError::DependencyMissing {
                format: FormatTag::Pipeline,
                dependency: DEPENDENCY,
            });
        }

        let index = self.read_index(&ctx.path)?;

        let class_name = index
            .get("_class_name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CLASS_NAME)
            .to_string();

        let mut components = BTreeMap::new();
        let mut declared = ArtifactConfig::new();
        for (key, value) in &index {
            if key.starts_with('_') {
                continue;
            }
            match component_spec(value) {
                Some(Some(component)) => {
                    if !ctx.path.join(key).is_dir() {
                        return Err(LoadError::load_failure(
                            FormatTag::Pipeline,
                            format!(
                                "component '{}' ({}) has no directory in {}",
                                key,
                                component.class_name,
                                ctx.path.display()
                            ),
                        ));
                    }
                    components.insert(key.clone(), component);
                }
                Some(None) => {}
                None => {
                    declared.insert(key.clone(), value.clone());
                }
            }
        }

        let params = declared.merged_with(&ctx.config);
        debug!(
            "Pipeline {} with {} components and {} parameters",
            class_name,
            components.len(),
            params.len()
        );

        let pipeline = Pipeline {
            class_name,
            components,
            params,
            precision: ctx.precision,
            device: ctx.device,
            inference_mode: false,
        };
        let info = format!("Pipeline loaded: {}", pipeline.class_name);

        Ok(LoadOutput {
            artifact: Artifact::new(Payload::Pipeline(pipeline)),
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Device, Precision};
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn context(path: PathBuf, config: &str) -> LoadContext {
        LoadContext {
            path,
            device: Device::Cpu,
            precision: Precision::Float32,
            config: ArtifactConfig::parse(config).unwrap(),
        }
    }

    fn write_pipeline(dir: &Path) {
        std::fs::write(
            dir.join("model_index.json"),
            r#"{
                "_class_name": "StableDiffusionPipeline",
                "_diffusers_version": "0.21.0",
                "unet": ["diffusers", "UNet2DConditionModel"],
                "vae": ["diffusers", "AutoencoderKL"],
                "safety_checker": [null, null],
                "requires_safety_checker": false,
                "scheduler_steps": 50
            }"#,
        )
        .unwrap();
        std::fs::create_dir(dir.join("unet")).unwrap();
        std::fs::create_dir(dir.join("vae")).unwrap();
    }

    #[test]
    fn test_unavailable_runtime_is_dependency_missing() {
        let temp_dir = TempDir::new().unwrap();
        write_pipeline(temp_dir.path());

        let result =
            PipelineLoader::unavailable().load(&context(temp_dir.path().to_path_buf(), ""));
        match result {
            Err(LoadError::DependencyMissing { format, dependency }) => {
                assert_eq!(format, FormatTag::Pipeline);
                assert_eq!(dependency, "pipeline");
            }
            other => panic!("Expected DependencyMissing, got {:?}", other),
        }
    }

    #[cfg(feature = "pipeline")]
    #[test]
    fn test_load_pipeline_merges_config() {
        let temp_dir = TempDir::new().unwrap();
        write_pipeline(temp_dir.path());

        let output = PipelineLoader::default()
            .load(&context(
                temp_dir.path().to_path_buf(),
                r#"{"scheduler_steps": 25, "variant": "fp16"}"#,
            ))
            .unwrap();
        assert_eq!(output.info, "Pipeline loaded: StableDiffusionPipeline");

        let pipeline = output.artifact.pipeline().unwrap();
        assert_eq!(
            pipeline.components.keys().cloned().collect::<Vec<_>>(),
            vec!["unet".to_string(), "vae".to_string()]
        );
        assert_eq!(pipeline.params.get("scheduler_steps"), Some(&json!(25)));
        assert_eq!(pipeline.params.get("variant"), Some(&json!("fp16")));
        assert_eq!(
            pipeline.params.get("requires_safety_checker"),
            Some(&json!(false))
        );
        assert!(pipeline.params.get("_diffusers_version").is_none());
        assert!(!pipeline.inference_mode);
    }

    #[cfg(feature = "pipeline")]
    #[test]
    fn test_missing_component_directory() {
        let temp_dir = TempDir::new().unwrap();
        write_pipeline(temp_dir.path());
        std::fs::remove_dir(temp_dir.path().join("vae")).unwrap();

        let result = PipelineLoader::default().load(&context(temp_dir.path().to_path_buf(), ""));
        assert!(matches!(result, Err(LoadError::LoadFailure { .. })));
    }

    #[cfg(feature = "pipeline")]
    #[test]
    fn test_directory_without_index() {
        let temp_dir = TempDir::new().unwrap();
        let result = PipelineLoader::default().load(&context(temp_dir.path().to_path_buf(), ""));
        match result {
            Err(LoadError::LoadFailure { message, .. }) => {
                assert!(message.contains("no index file"))
            }
            other => panic!("Expected LoadFailure, got {:?}", other),
        }
    }
}

use crate::artifact::{Artifact, InferenceSession, Payload};
use crate::error::LoadError;
use crate::loader::{LoadContext, LoadOutput, Loader};
use crate::types::FormatTag;
use tracing::debug;

const DEPENDENCY: &str = "onnx";

/// Builds an inference session from a serialized ONNX graph
#[derive(Debug, Clone)]
pub struct SessionLoader {
    runtime_available: bool,
}

impl Default for SessionLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLoader {
    pub fn new() -> Self {
        Self {
            runtime_available: cfg!(feature = "onnx"),
        }
    }

    /// A loader on a host without the inference runtime
    pub fn unavailable() -> Self {
        Self {
            runtime_available: false,
        }
    }
}

impl Loader for SessionLoader {
    fn format(&self) -> FormatTag {
        FormatTag::InferenceSession
    }

    fn load(&self, ctx: &LoadContext) -> Result<LoadOutput, LoadError> {
        if !self.runtime_available {
            return Err(LoadError::DependencyMissing {
                format: FormatTag::InferenceSession,
                dependency: DEPENDENCY,
            });
        }

        let bytes = std::fs::read(&ctx.path).map_err(|e| {
            LoadError::load_failure(
                FormatTag::InferenceSession,
                format!("failed to read {}: {}", ctx.path.display(), e),
            )
        })?;
        let mut session = decode_session(&bytes).map_err(|message| {
            LoadError::load_failure(
                FormatTag::InferenceSession,
                format!("{}: {}", ctx.path.display(), message),
            )
        })?;
        session.options = ctx.config.clone();

        debug!(
            "Session from {} (ir {}) has {} inputs and {} outputs",
            if session.producer.is_empty() { "unknown producer" } else { session.producer.as_str() },
            session.ir_version,
            session.inputs.len(),
            session.outputs.len()
        );

        let info = format!("Inference session loaded with {} inputs", session.inputs.len());
        Ok(LoadOutput {
            artifact: Artifact::new(Payload::Session(session)),
            info,
        })
    }
}

#[cfg(feature = "onnx")]
pub(crate) mod proto {
    //! The subset of the ONNX protobuf schema a session needs. Other fields
    //! are skipped on decode.

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ModelProto {
        #[prost(int64, tag = "1")]
        pub ir_version: i64,
        #[prost(string, tag = "2")]
        pub producer_name: String,
        #[prost(message, optional, tag = "7")]
        pub graph: Option<GraphProto>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GraphProto {
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(message, repeated, tag = "5")]
        pub initializer: Vec<TensorProto>,
        #[prost(message, repeated, tag = "11")]
        pub input: Vec<ValueInfoProto>,
        #[prost(message, repeated, tag = "12")]
        pub output: Vec<ValueInfoProto>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ValueInfoProto {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TensorProto {
        #[prost(string, tag = "8")]
        pub name: String,
    }
}

#[cfg(feature = "onnx")]
fn decode_session(bytes: &[u8]) -> Result<InferenceSession, String> {
    use prost::Message;
    use std::collections::HashSet;

    let model = proto::ModelProto::decode(bytes).map_err(|e| e.to_string())?;
    let graph = model.graph.ok_or_else(|| "model has no graph".to_string())?;

    // Initializers may also be listed as graph inputs; they are weights, not feeds
    let initializers: HashSet<&str> = graph.initializer.iter().map(|t| t.name.as_str()).collect();
    let inputs = graph
        .input
        .iter()
        .filter(|v| !initializers.contains(v.name.as_str()))
        .map(|v| v.name.clone())
        .collect();
    let outputs = graph.output.iter().map(|v| v.name.clone()).collect();

    Ok(InferenceSession {
        inputs,
        outputs,
        producer: model.producer_name,
        ir_version: model.ir_version,
        options: Default::default(),
    })
}

#[cfg(not(feature = "onnx"))]
fn decode_session(_bytes: &[u8]) -> Result<InferenceSession, String> {
    Err(format!("{} support is not compiled in", DEPENDENCY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactConfig;
    use crate::types::{Device, Precision};
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

    #[cfg(feature = "onnx")]
    fn write_model(path: &std::path::Path, graph: Option<proto::GraphProto>) {
        use prost::Message;

        let model = proto::ModelProto {
            ir_version: 8,
            producer_name: "pytorch".to_string(),
            graph,
        };
        std::fs::write(path, model.encode_to_vec()).unwrap();
    }

    #[cfg(feature = "onnx")]
    fn value(name: &str) -> proto::ValueInfoProto {
        proto::ValueInfoProto {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_unavailable_runtime() {
        let result = SessionLoader::unavailable().load(&context(PathBuf::from("/m/model.onnx"), ""));
        match result {
            Err(LoadError::DependencyMissing { format, dependency }) => {
                assert_eq!(format, FormatTag::InferenceSession);
                assert_eq!(dependency, "onnx");
            }
            other => panic!("Expected DependencyMissing, got {:?}", other),
        }
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_inputs_exclude_initializers() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.onnx");
        write_model(
            &path,
            Some(proto::GraphProto {
                name: "main".to_string(),
                initializer: vec![proto::TensorProto {
                    name: "fc.weight".to_string(),
                }],
                input: vec![value("input_ids"), value("attention_mask"), value("fc.weight")],
                output: vec![value("logits")],
            }),
        );

        let output = SessionLoader::new()
            .load(&context(path, r#"{"intra_op_threads": 2}"#))
            .unwrap();
        assert_eq!(output.info, "Inference session loaded with 2 inputs");

        let session = output.artifact.session().unwrap();
        assert_eq!(session.inputs, vec!["input_ids", "attention_mask"]);
        assert_eq!(session.outputs, vec!["logits"]);
        assert_eq!(session.producer, "pytorch");
        assert_eq!(session.ir_version, 8);
        assert_eq!(
            session.options.get("intra_op_threads"),
            Some(&serde_json::json!(2))
        );
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_model_without_graph() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.onnx");
        write_model(&path, None);

        let result = SessionLoader::new().load(&context(path, ""));
        match result {
            Err(LoadError::LoadFailure { message, .. }) => assert!(message.contains("no graph")),
            other => panic!("Expected LoadFailure, got {:?}", other),
        }
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_garbage_is_load_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.onnx");
        std::fs::write(&path, b"not an onnx file").unwrap();

        let result = SessionLoader::new().load(&context(path, ""));
        assert!(matches!(result, Err(LoadError::LoadFailure { .. })));
    }
}

//! # Artifact Loader
//!
//! Cached loading of disk-resident model artifacts. A request names a path
//! plus device, precision and format preferences; the [`ArtifactCache`]
//! detects the format, resolves the device and precision policy, dispatches to
//! a format-specific [`Loader`], applies best-effort optimizations and records
//! [`Metadata`] describing the load.
//!
//! Successful loads are cached by a deterministic [`CacheKey`]. Concurrent
//! requests for the same key share one in-flight load.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod detection;
pub mod device;
pub mod error;
pub mod key;
pub mod loader;
pub mod loaders;
pub mod metadata;
pub mod optimize;
pub mod tensor;
pub mod types;

// Re-export main types for convenience
pub use artifact::{Artifact, ArtifactHandle, ExecutionHints, InferenceSession, Payload, Pipeline};
pub use cache::{ArtifactCache, CacheEntry, CacheEntrySummary, CacheStats};
pub use config::{ArtifactConfig, EngineConfig};
pub use detection::FormatDetector;
pub use device::{
    CapabilityProbe, DeviceResolver, DeviceStats, PrecisionResolver, StaticProbe, SystemProbe,
};
pub use error::{ErrorKind, LoadError, OptimizationError};
pub use key::CacheKey;
pub use loader::{LoadContext, LoadOutput, Loader, LoaderRegistry};
pub use metadata::{FailureRecord, LoadMetadata, Metadata, MetadataBuilder};
pub use optimize::OptimizationPass;
pub use tensor::{Tensor, TensorData, TensorMap};
pub use types::{
    AcceleratorKind, ArtifactId, ArtifactRequest, Device, DevicePreference, FormatHint, FormatTag,
    LoadResponse, Precision, PrecisionPreference,
};

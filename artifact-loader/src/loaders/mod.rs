//! Loader variants, one per [`FormatTag`](crate::types::FormatTag).

pub mod checkpoint;
pub mod pipeline;
pub mod safetensors;
pub mod session;

pub use self::checkpoint::CheckpointLoader;
pub use self::pipeline::PipelineLoader;
pub use self::safetensors::SafetensorsLoader;
pub use self::session::SessionLoader;

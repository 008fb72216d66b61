//! Loads a small checkpoint twice; the second request is a cache hit.
//!
//! Set `ARTIFACT_LOADER_DEBUG=1` to see detection, device resolution and cache events.

use artifact_loader::loaders::checkpoint::write_checkpoint;
use artifact_loader::{ArtifactCache, ArtifactRequest, EngineConfig, LoadResponse, Tensor, TensorMap};

fn print_response(label: &str, response: &LoadResponse) -> anyhow::Result<()> {
    println!("== {} ==", label);
    match &response.artifact {
        Some(handle) => println!(
            "artifact: {} ({})",
            handle.id(),
            handle.artifact()?.payload.kind_name()
        ),
        None => println!("artifact: none"),
    }
    println!("info:     {}", response.info);
    println!(
        "metadata: {}",
        serde_json::to_string_pretty(&response.metadata)?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = if std::env::var_os("ARTIFACT_LOADER_DEBUG").is_some() {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let workdir = tempfile::tempdir()?;
    let path = workdir.path().join("demo.ckpt");

    let mut weights = TensorMap::new();
    weights.insert(
        "linear.weight",
        Tensor::from_f32(vec![2, 3], vec![0.5, -0.25, 1.0, 2.0, 0.0, -1.5]),
    );
    weights.insert("linear.bias", Tensor::from_f32(vec![2], vec![0.1, 0.2]));
    weights
        .extras
        .insert("epoch".to_string(), serde_json::json!(7));
    write_checkpoint(&path, &weights)?;

    let cache = ArtifactCache::new(EngineConfig::default())?;
    let request = ArtifactRequest::new(&path).with_config(r#"{"strict": true}"#);

    let first = cache.request(request.clone()).await;
    print_response("first request", &first)?;

    let second = cache.request(request).await;
    print_response("second request", &second)?;

    let missing = cache
        .request(ArtifactRequest::new(workdir.path().join("missing.ckpt")))
        .await;
    print_response("missing file", &missing)?;

    println!("stats: {:?}", cache.stats());
    Ok(())
}

//! # Artifact Cache
//!
//! Top-level orchestrator: validates a request, derives its cache key, serves
//! cached artifacts and otherwise runs the full load pipeline (detection,
//! device and precision policy, loader dispatch, optimization, metadata).
//!
//! Concurrent requests for the same key and caching mode share a single
//! in-flight load. Each
//! load runs in its own task and publishes its entry in one step, so a caller
//! that stops waiting never leaves a partial entry behind.

use crate::artifact::ArtifactHandle;
use crate::config::{ArtifactConfig, EngineConfig};
use crate::detection::FormatDetector;
use crate::device::{CapabilityProbe, DeviceResolver, PrecisionResolver, SystemProbe};
use crate::error::{ErrorKind, LoadError};
use crate::key::CacheKey;
use crate::loader::{LoadContext, LoaderRegistry};
use crate::metadata::{FailureRecord, LoadMetadata, Metadata, MetadataBuilder};
use crate::optimize::OptimizationPass;
use crate::types::{
    ArtifactId, ArtifactRequest, Device, FormatHint, FormatTag, LoadResponse, Precision,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

const CACHE_HIT_INFO: &str = "Model loaded from cache";

/// Result of one completed load, shared by every caller waiting on it
#[derive(Debug, Clone)]
struct LoadedEntry {
    handle: ArtifactHandle,
    metadata: LoadMetadata,
    info: String,
}

type LoadOutcome = Result<LoadedEntry, FailureRecord>;
type InFlightLoad = Shared<BoxFuture<'static, LoadOutcome>>;

/// In-flight loads are shared only between requests with the same caching mode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InFlightKey {
    key: CacheKey,
    publish: bool,
}

impl InFlightKey {
    fn new(key: &CacheKey, request: &ArtifactRequest) -> Self {
        Self {
            key: key.clone(),
            publish: request.cache_enabled,
        }
    }
}

/// A cached artifact together with how it was loaded
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub handle: ArtifactHandle,
    pub metadata: LoadMetadata,
    pub info: String,
    /// Insertion order, for diagnostics only
    pub sequence: u64,
}

impl CacheEntry {
    pub fn summary(&self) -> CacheEntrySummary {
        CacheEntrySummary {
            key: self.key.clone(),
            id: self.handle.id(),
            path: self.metadata.path.clone(),
            format: self.metadata.format,
            device: self.metadata.device,
            precision: self.metadata.precision,
            size_bytes: self.metadata.size_bytes,
            sequence: self.sequence,
        }
    }
}

/// Diagnostic view of one cache entry
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheEntrySummary {
    pub key: CacheKey,
    pub id: ArtifactId,
    pub path: PathBuf,
    pub format: FormatTag,
    pub device: Device,
    pub precision: Precision,
    pub size_bytes: u64,
    pub sequence: u64,
}

/// Counters describing how requests were served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Requests answered from the table without a load
    pub hits: u64,
    /// Requests that needed a load (started or joined)
    pub misses: u64,
    /// Loads that completed successfully
    pub loads: u64,
    /// Loads that failed
    pub failures: u64,
    /// Requests that joined a load already in flight
    pub coalesced: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

enum Admission {
    Cached(LoadResponse),
    Started(InFlightLoad),
    Joined(InFlightLoad),
}

struct CacheInner {
    config: EngineConfig,
    detector: FormatDetector,
    registry: LoaderRegistry,
    probe: Arc<dyn CapabilityProbe>,
    optimizer: OptimizationPass,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    /// Lock order: `in_flight` before `entries`
    in_flight: Mutex<HashMap<InFlightKey, InFlightLoad>>,
    sequence: AtomicU64,
    counters: Counters,
}

/// Loads artifacts on request and keeps successful loads until explicitly
/// removed. Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct ArtifactCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("entries", &self.len())
            .field("formats", &self.inner.registry.formats())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ArtifactCache {
    /// Create a cache with the default loaders and the host capability probe
    pub fn new(config: EngineConfig) -> Result<Self, LoadError> {
        let registry = LoaderRegistry::with_default_loaders(&config);
        Self::with_components(config, registry, Arc::new(SystemProbe))
    }

    pub fn with_components(
        config: EngineConfig,
        registry: LoaderRegistry,
        probe: Arc<dyn CapabilityProbe>,
    ) -> Result<Self, LoadError> {
        config.validate()?;
        info!(
            "Artifact cache ready with loaders for {:?}",
            registry.formats()
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                detector: FormatDetector::from_config(&config),
                optimizer: OptimizationPass::from_config(&config),
                config,
                registry,
                probe,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Resolve a request into an artifact.
    ///
    /// Never fails: every problem is reported through the response's info
    /// string and failure metadata.
    pub async fn request(&self, request: ArtifactRequest) -> LoadResponse {
        if !request.path_exists() {
            warn!("Model file not found: {}", request.path.display());
            return not_found(&request);
        }

        let key = match request.cache_key() {
            Ok(key) => key,
            Err(e) => {
                warn!("Failed to derive cache key: {}", e.summary());
                return match e {
                    LoadError::FileNotFound(_) => not_found(&request),
                    other => failed(FailureRecord::from_error(&other)),
                };
            }
        };

        let load = match self.inner.admit(&key, &request) {
            Admission::Cached(response) => {
                Counters::bump(&self.inner.counters.hits);
                return response;
            }
            Admission::Started(load) => {
                Counters::bump(&self.inner.counters.misses);
                load
            }
            Admission::Joined(load) => {
                Counters::bump(&self.inner.counters.misses);
                Counters::bump(&self.inner.counters.coalesced);
                debug!("Joining in-flight load for {}", key.short());
                load
            }
        };

        match load.await {
            Ok(loaded) => LoadResponse {
                artifact: Some(loaded.handle),
                info: loaded.info,
                metadata: Metadata::Loaded(loaded.metadata),
                from_cache: false,
            },
            Err(record) => failed(record),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read_entries().is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.read_entries().contains_key(key)
    }

    /// Remove one entry, releasing its handle
    pub fn remove(&self, key: &CacheKey) -> bool {
        match self.inner.write_entries().remove(key) {
            Some(entry) => {
                entry.handle.release();
                info!("Removed {} from cache", entry.metadata.path.display());
                true
            }
            None => false,
        }
    }

    /// Remove every entry, releasing all handles. Returns the number removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<CacheEntry> = {
            let mut entries = self.inner.write_entries();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.handle.release();
        }
        info!("Cleared {} cache entries", drained.len());
        drained.len()
    }

    /// Summaries of all entries in insertion order
    pub fn entries(&self) -> Vec<CacheEntrySummary> {
        let mut summaries: Vec<CacheEntrySummary> = self
            .inner
            .read_entries()
            .values()
            .map(CacheEntry::summary)
            .collect();
        summaries.sort_by_key(|summary| summary.sequence);
        summaries
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }
}

impl CacheInner {
    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<InFlightKey, InFlightLoad>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached_response(&self, key: &CacheKey) -> Option<LoadResponse> {
        let entries = self.read_entries();
        let entry = entries.get(key)?;
        debug!(
            "Cache hit for {} ({})",
            entry.metadata.path.display(),
            key.short()
        );
        Some(LoadResponse {
            artifact: Some(entry.handle.clone()),
            info: CACHE_HIT_INFO.to_string(),
            metadata: Metadata::Loaded(entry.metadata.clone()),
            from_cache: true,
        })
    }

    /// Serve from the table, join a load in flight, or start a new one.
    ///
    /// Forced reloads skip the table but still join an in-flight load with the
    /// same caching mode, which is already a fresh read of the artifact.
    fn admit(self: &Arc<Self>, key: &CacheKey, request: &ArtifactRequest) -> Admission {
        let use_table = request.cache_enabled && !request.force_reload;
        if use_table {
            if let Some(response) = self.cached_response(key) {
                return Admission::Cached(response);
            }
        }

        let flight = InFlightKey::new(key, request);
        let mut in_flight = self.lock_in_flight();
        if let Some(load) = in_flight.get(&flight) {
            return Admission::Joined(load.clone());
        }
        // A load may have published between the table check and taking the lock
        if use_table {
            if let Some(response) = self.cached_response(key) {
                return Admission::Cached(response);
            }
        }

        debug!("Cache miss for {}", key.short());
        let load = self.spawn_load(flight.clone(), request.clone());
        in_flight.insert(flight, load.clone());
        Admission::Started(load)
    }

    fn spawn_load(
        self: &Arc<Self>,
        flight: InFlightKey,
        request: ArtifactRequest,
    ) -> InFlightLoad {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_load(flight, request).await });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(FailureRecord::new(
                    ErrorKind::LoadFailure,
                    format!("load task failed: {}", e),
                )),
            }
        }
        .boxed()
        .shared()
    }

    async fn run_load(
        self: Arc<Self>,
        flight: InFlightKey,
        request: ArtifactRequest,
    ) -> LoadOutcome {
        let key = &flight.key;
        let worker = Arc::clone(&self);
        let result = tokio::task::spawn_blocking(move || worker.load_blocking(&request)).await;

        let outcome = match result {
            Ok(Ok(loaded)) => {
                Counters::bump(&self.counters.loads);
                if flight.publish {
                    self.publish(key, &loaded);
                }
                Ok(loaded)
            }
            Ok(Err(e)) => {
                Counters::bump(&self.counters.failures);
                warn!("Failed to load model: {}", e);
                Err(FailureRecord::from_error(&e))
            }
            Err(e) => {
                Counters::bump(&self.counters.failures);
                warn!("Load worker for {} did not finish: {}", key.short(), e);
                Err(FailureRecord::new(
                    ErrorKind::LoadFailure,
                    format!("load worker failed: {}", e),
                ))
            }
        };

        self.lock_in_flight().remove(&flight);
        outcome
    }

    fn load_blocking(&self, request: &ArtifactRequest) -> Result<LoadedEntry, LoadError> {
        let started = Instant::now();

        let path = request.normalized_path()?;
        let config = ArtifactConfig::parse_lenient(&request.config);
        let device = DeviceResolver::resolve(request.device, self.probe.as_ref());
        let precision = PrecisionResolver::resolve(request.precision, device);
        let format = match request.format {
            FormatHint::Auto => self.detector.detect(&path),
            FormatHint::Explicit(format) => format,
        };

        info!(
            "Loading {} model from {} on {} as {}",
            format,
            path.display(),
            device,
            precision
        );

        let ctx = LoadContext {
            path: path.clone(),
            device,
            precision,
            config,
        };
        let output = self.registry.dispatch(format, &ctx)?;

        let artifact = if request.optimize {
            self.optimizer.apply(output.artifact, device, precision)
        } else {
            output.artifact
        };
        // Record what the handle holds, not what was asked for
        let held_precision = artifact.precision().unwrap_or(precision);

        let handle = ArtifactHandle::new(artifact);
        let load_time = started.elapsed();
        let metadata = MetadataBuilder::build(
            &path,
            format,
            device,
            held_precision,
            self.probe.device_stats(device),
        )?
        .with_load(handle.id(), load_time.as_millis() as u64);

        info!(
            "Loaded {} in {:.2}s: {}",
            path.display(),
            load_time.as_secs_f64(),
            output.info
        );

        Ok(LoadedEntry {
            handle,
            metadata,
            info: output.info,
        })
    }

    /// Insert or overwrite the entry for `key`, releasing any replaced handle
    fn publish(&self, key: &CacheKey, loaded: &LoadedEntry) {
        let entry = CacheEntry {
            key: key.clone(),
            handle: loaded.handle.clone(),
            metadata: loaded.metadata.clone(),
            info: loaded.info.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let replaced = self.write_entries().insert(key.clone(), entry);
        if let Some(old) = replaced {
            old.handle.release();
            debug!("Replaced cache entry {}", key.short());
        }
        info!(
            "Cached {} as {}",
            loaded.metadata.path.display(),
            key.short()
        );
    }
}

fn not_found(request: &ArtifactRequest) -> LoadResponse {
    LoadResponse {
        artifact: None,
        info: format!("Model file not found: {}", request.path.display()),
        metadata: Metadata::Failed(FailureRecord::file_not_found()),
        from_cache: false,
    }
}

fn failed(record: FailureRecord) -> LoadResponse {
    LoadResponse {
        artifact: None,
        info: format!("Failed to load model: {}", record.error),
        metadata: Metadata::Failed(record),
        from_cache: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, Payload};
    use crate::device::StaticProbe;
    use crate::loader::{LoadOutput, MockLoader};
    use crate::loaders::PipelineLoader;
    use crate::tensor::{Tensor, TensorMap};
    use crate::types::{DevicePreference, PrecisionPreference};
    use tempfile::TempDir;

    fn tensor_output() -> Result<LoadOutput, LoadError> {
        let mut map = TensorMap::new();
        map.insert("w", Tensor::from_f32(vec![2], vec![1.0, 2.0]));
        Ok(LoadOutput {
            artifact: Artifact::new(Payload::Tensors(map)),
            info: "Checkpoint loaded with 1 keys".to_string(),
        })
    }

    fn mock_loader(times: usize) -> MockLoader {
        let mut loader = MockLoader::new();
        loader.expect_format().return_const(FormatTag::Checkpoint);
        loader
            .expect_load()
            .times(times)
            .returning(|_| tensor_output());
        loader
    }

    fn cache_with(loader: MockLoader, probe: StaticProbe) -> ArtifactCache {
        let mut registry = LoaderRegistry::new();
        registry.register(Box::new(loader));
        ArtifactCache::with_components(EngineConfig::default(), registry, Arc::new(probe)).unwrap()
    }

    fn model_file(temp_dir: &TempDir) -> PathBuf {
        let path = temp_dir.path().join("model.ckpt");
        std::fs::write(&path, b"{}").unwrap();
        path
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let temp_dir = TempDir::new().unwrap();
        let path = model_file(&temp_dir);
        let cache = cache_with(mock_loader(1), StaticProbe::cpu_only());

        let first = cache.request(ArtifactRequest::new(&path)).await;
        let second = cache.request(ArtifactRequest::new(&path)).await;

        assert!(first.is_success());
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.info, "Model loaded from cache");
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(first.metadata, second.metadata);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_force_reload_overwrites_and_releases() {
        let temp_dir = TempDir::new().unwrap();
        let path = model_file(&temp_dir);
        let cache = cache_with(mock_loader(2), StaticProbe::cpu_only());

        let first = cache.request(ArtifactRequest::new(&path)).await;
        let forced = cache
            .request(ArtifactRequest::new(&path).with_force_reload(true))
            .await;

        assert!(!forced.from_cache);
        assert_ne!(first.artifact, forced.artifact);
        assert_eq!(cache.len(), 1);

        let old = first.artifact.unwrap();
        assert!(matches!(old.artifact(), Err(LoadError::HandleReleased)));
        assert!(forced.artifact.unwrap().artifact().is_ok());
    }

    #[tokio::test]
    async fn test_cache_disabled_always_loads() {
        let temp_dir = TempDir::new().unwrap();
        let path = model_file(&temp_dir);
        let cache = cache_with(mock_loader(2), StaticProbe::cpu_only());

        for _ in 0..2 {
            let response = cache
                .request(ArtifactRequest::new(&path).with_cache_enabled(false))
                .await;
            assert!(response.is_success());
            assert!(response.artifact.unwrap().is_live());
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let path = model_file(&temp_dir);

        let mut loader = MockLoader::new();
        loader.expect_format().return_const(FormatTag::Checkpoint);
        loader.expect_load().times(2).returning(|_| {
            Err(LoadError::load_failure(
                FormatTag::Checkpoint,
                "unexpected end of file",
            ))
        });
        let cache = cache_with(loader, StaticProbe::cpu_only());

        for _ in 0..2 {
            let response = cache.request(ArtifactRequest::new(&path)).await;
            assert!(response.artifact.is_none());
            assert_eq!(
                response.info,
                "Failed to load model: checkpoint load failed: unexpected end of file"
            );
            assert_eq!(
                response.metadata.error(),
                Some("checkpoint load failed: unexpected end of file")
            );
        }
        assert!(cache.is_empty());
        assert_eq!(cache.stats().failures, 2);
    }

    #[tokio::test]
    async fn test_unregistered_format_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.onnx");
        std::fs::write(&path, b"").unwrap();
        let cache = cache_with(mock_loader(0), StaticProbe::cpu_only());

        let response = cache.request(ArtifactRequest::new(&path)).await;
        match response.metadata {
            Metadata::Failed(record) => assert_eq!(record.kind, ErrorKind::UnsupportedFormat),
            other => panic!("Expected failure metadata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dependency_missing_is_structured_failure() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("model_index.json"), "{}").unwrap();

        let mut registry = LoaderRegistry::new();
        registry.register(Box::new(PipelineLoader::unavailable()));
        let cache = ArtifactCache::with_components(
            EngineConfig::default(),
            registry,
            Arc::new(StaticProbe::cpu_only()),
        )
        .unwrap();

        let response = cache.request(ArtifactRequest::new(temp_dir.path())).await;
        assert!(response.artifact.is_none());
        match response.metadata {
            Metadata::Failed(record) => assert_eq!(record.kind, ErrorKind::DependencyMissing),
            other => panic!("Expected failure metadata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accelerator_load_records_device_stats() {
        let temp_dir = TempDir::new().unwrap();
        let path = model_file(&temp_dir);

        let mut loader = MockLoader::new();
        loader.expect_format().return_const(FormatTag::Checkpoint);
        loader
            .expect_load()
            .withf(|ctx| ctx.precision == Precision::Float16 && ctx.device.is_accelerator())
            .times(1)
            .returning(|_| tensor_output());
        let probe = StaticProbe::with_accelerator().with_stats(crate::device::DeviceStats {
            memory_allocated_bytes: 1024,
            memory_reserved_bytes: 2048,
        });
        let cache = cache_with(loader, probe);

        let response = cache.request(ArtifactRequest::new(&path)).await;
        let meta = response.metadata.loaded().unwrap();
        assert_eq!(meta.device.as_str(), "cuda");
        assert_eq!(meta.precision, Precision::Float16);
        assert_eq!(meta.device_stats.unwrap().memory_allocated_bytes, 1024);

        // Optimization downcast the tensors on the accelerator
        let handle = response.artifact.unwrap();
        let tensors = handle.artifact().unwrap().tensors().unwrap();
        assert_eq!(
            tensors.get("w").unwrap().precision(),
            Some(Precision::Float16)
        );
    }

    #[tokio::test]
    async fn test_pinned_precision_survives_accelerator_optimization() {
        let temp_dir = TempDir::new().unwrap();
        let path = model_file(&temp_dir);
        let cache = cache_with(mock_loader(1), StaticProbe::with_accelerator());

        let response = cache
            .request(
                ArtifactRequest::new(&path)
                    .with_precision(PrecisionPreference::Explicit(Precision::Float32)),
            )
            .await;
        let meta = response.metadata.loaded().unwrap();
        assert_eq!(meta.precision, Precision::Float32);

        let handle = response.artifact.unwrap();
        let tensors = handle.artifact().unwrap().tensors().unwrap();
        assert_eq!(
            tensors.get("w").unwrap().precision(),
            Some(Precision::Float32)
        );
    }

    #[tokio::test]
    async fn test_differently_phrased_preferences_are_distinct_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = model_file(&temp_dir);
        let cache = cache_with(mock_loader(2), StaticProbe::cpu_only());

        cache.request(ArtifactRequest::new(&path)).await;
        cache
            .request(
                ArtifactRequest::new(&path)
                    .with_device(DevicePreference::Cpu)
                    .with_precision(PrecisionPreference::Explicit(Precision::Float32)),
            )
            .await;
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_management_api() {
        let temp_dir = TempDir::new().unwrap();
        let first_path = model_file(&temp_dir);
        let second_path = temp_dir.path().join("other.ckpt");
        std::fs::write(&second_path, b"{}").unwrap();
        let cache = cache_with(mock_loader(2), StaticProbe::cpu_only());

        let first = cache.request(ArtifactRequest::new(&first_path)).await;
        let second = cache.request(ArtifactRequest::new(&second_path)).await;

        let entries = cache.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].sequence < entries[1].sequence);
        assert_eq!(entries[0].id, first.artifact.as_ref().unwrap().id());

        let key = ArtifactRequest::new(&first_path).cache_key().unwrap();
        assert!(cache.contains(&key));
        assert!(cache.remove(&key));
        assert!(!cache.remove(&key));
        assert!(!first.artifact.unwrap().is_live());

        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
        assert!(!second.artifact.unwrap().is_live());
    }

    #[tokio::test]
    async fn test_missing_file_never_reaches_loader() {
        let cache = cache_with(mock_loader(0), StaticProbe::cpu_only());
        let response = cache
            .request(ArtifactRequest::new("/no/such/model.ckpt"))
            .await;

        assert!(response.artifact.is_none());
        assert_eq!(response.info, "Model file not found: /no/such/model.ckpt");
        assert_eq!(response.metadata.error(), Some("file_not_found"));
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_invalid_engine_config_is_rejected() {
        let config = EngineConfig {
            index_markers: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            ArtifactCache::new(config),
            Err(LoadError::InvalidConfig(_))
        ));
    }
}

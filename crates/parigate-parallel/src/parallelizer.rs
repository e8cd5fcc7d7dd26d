//! Parallelization driver and the architecture registry
//!
//! The registry is an explicit mapping from architecture identifier to a
//! `Parallelizer` implementation, populated at process start. Resolution of
//! an unregistered architecture is fatal.

use crate::nanollama::NanoLlamaParallelizer;
use candle_core::Tensor;
use once_cell::sync::Lazy;
use parigate_types::{ParigateError, Result, RunConfig};
use parigate_model::{ModelHandle, ModelOutputs, ProbeInput};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Options the driver passes to a sharding transformation
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub shard_count: usize,
    pub parallelize_embeddings: bool,
    pub sequence_parallel: bool,
    pub run_id: String,
}

impl ParallelOptions {
    /// Derive options from a run configuration; a shard count of 1 keeps
    /// the parallelization flags inert.
    pub fn from_run(run: &RunConfig) -> Self {
        Self {
            shard_count: run.shard_count,
            parallelize_embeddings: run.parallelize_embeddings(),
            sequence_parallel: run.sequence_parallel(),
            run_id: run.run_id.clone(),
        }
    }

    /// Whether the loss primitive must leave its input logits untouched.
    ///
    /// Required exactly when embeddings are parallelized: the raw sharded
    /// logits are persisted in the bundle and must be observable unmutated.
    pub fn preserve_logits(&self) -> bool {
        self.parallelize_embeddings
    }
}

/// A model ready to execute its forward pass, one output set per rank
pub trait ShardedForward: Send + Sync {
    fn world_size(&self) -> usize;

    /// Run the forward pass on every rank in lockstep
    fn forward(
        &self,
        inputs: &ProbeInput,
        labels: Option<&Tensor>,
        preserve_logits: bool,
    ) -> Result<Vec<ModelOutputs>>;
}

/// Capability: shard one model family across a device set
pub trait Parallelizer: Send + Sync {
    fn architecture(&self) -> &str;

    fn parallelize(
        &self,
        handle: ModelHandle,
        opts: &ParallelOptions,
    ) -> Result<Box<dyn ShardedForward>>;
}

impl std::fmt::Debug for dyn Parallelizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallelizer")
            .field("architecture", &self.architecture())
            .finish()
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn Parallelizer>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a sharding transformation
pub fn register(parallelizer: Arc<dyn Parallelizer>) {
    let architecture = parallelizer.architecture().to_string();
    info!(architecture = %architecture, "registering parallelizer");
    REGISTRY.write().insert(architecture, parallelizer);
}

/// Resolve the transformation for an architecture
pub fn resolve(architecture: &str) -> Result<Arc<dyn Parallelizer>> {
    REGISTRY
        .read()
        .get(architecture)
        .cloned()
        .ok_or_else(|| ParigateError::unsupported_architecture(architecture))
}

/// Populate the registry with the built-in transformations. Idempotent;
/// called once at process start.
pub fn register_builtin() {
    if !REGISTRY.read().contains_key("nanollama") {
        register(Arc::new(NanoLlamaParallelizer));
    }
}

/// Driver entry point: shard (or identity-place) a model for execution.
///
/// A shard count of 1 degenerates to the identity transformation: full
/// weights on a single device, every collective a no-op.
pub fn parallelize(handle: ModelHandle, opts: &ParallelOptions) -> Result<Box<dyn ShardedForward>> {
    let parallelizer = resolve(&handle.config.architecture)?;
    info!(
        architecture = %handle.config.architecture,
        shard_count = opts.shard_count,
        parallelize_embeddings = opts.parallelize_embeddings,
        sequence_parallel = opts.sequence_parallel,
        "applying parallelization"
    );
    parallelizer.parallelize(handle, opts)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_architecture_resolution_fails() {
        register_builtin();
        let err = resolve("gptX").unwrap_err();
        assert!(matches!(
            err,
            ParigateError::UnsupportedArchitecture { .. }
        ));
        assert!(resolve("nanollama").is_ok());
    }

    #[test]
    fn register_builtin_is_idempotent() {
        register_builtin();
        register_builtin();
        assert!(resolve("nanollama").is_ok());
    }

    #[test]
    fn options_fold_in_the_baseline_inertness_rule() {
        use parigate_types::{Device, RunFlags};
        let run = RunConfig {
            architecture: "nanollama".to_string(),
            pretrained_source: None,
            shard_count: 1,
            flags: RunFlags {
                from_config: true,
                parallelize_embeddings: true,
                sequence_parallel: true,
                ..Default::default()
            },
            overrides: Vec::new(),
            seed: 0,
            run_id: "r".to_string(),
            output_dir: std::path::PathBuf::from("/tmp"),
            device: Device::Cpu,
        };
        let opts = ParallelOptions::from_run(&run);
        assert!(!opts.parallelize_embeddings);
        assert!(!opts.sequence_parallel);
        assert!(!opts.preserve_logits());
    }
}

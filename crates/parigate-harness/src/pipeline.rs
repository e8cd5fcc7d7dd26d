//! The verification pipeline
//!
//! Loader → parallelization driver → input conditioner → forward →
//! synchronization barrier → reconciler → artifact writer. Two independent
//! invocations (baseline and sharded) are expected to run as separate
//! processes; the artifact diff is external.

use crate::artifact;
use crate::gather::AxisGatherPolicy;
use crate::inputs::build_inputs;
use crate::reconcile::{reconcile, OutputBundle};
use candle_core::Tensor;
use parigate_model::{load, ProbeInput};
use parigate_parallel::{parallelize, register_builtin, ParallelOptions};
use parigate_types::{ParigateError, Result, RunConfig};
use std::path::PathBuf;
use tracing::info;

/// The fixed probe sentence every run conditions its inputs from
pub const PROBE_TEXT: &str = "This is a test to check that tensor parallel works.";

/// Label generator capability: a causal objective predicts the next
/// token, so labels are the input ids (the shift happens inside the loss).
pub fn synthesize_labels(inputs: &ProbeInput) -> Result<Tensor> {
    Ok(inputs.get("input_ids")?.clone())
}

/// One end-to-end verification run
pub struct VerificationPipeline {
    run: RunConfig,
    policy: AxisGatherPolicy,
}

impl VerificationPipeline {
    pub fn new(run: RunConfig) -> Result<Self> {
        run.validate()?;
        Ok(Self {
            run,
            policy: AxisGatherPolicy::default(),
        })
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    /// Execute the pipeline and return the written artifact path
    pub fn execute(&self) -> Result<PathBuf> {
        let bundle = self.execute_to_bundle()?;
        artifact::write(&bundle, &self.run.output_dir, self.run.artifact_name())
    }

    /// Execute everything up to (and including) reconciliation
    pub fn execute_to_bundle(&self) -> Result<OutputBundle> {
        register_builtin();

        info!(
            architecture = %self.run.architecture,
            shard_count = self.run.shard_count,
            seed = self.run.seed,
            "starting verification run"
        );

        let handle = load(&self.run)?;
        let spec = handle.forward_spec();
        let device = handle.device.clone();

        let inputs = build_inputs(
            PROBE_TEXT,
            handle.tokenizer.as_ref(),
            &spec,
            self.run.shard_count,
            self.run.sequence_parallel(),
            &device,
        )?;

        let labels = if self.run.flags.loss_supported {
            Some(synthesize_labels(&inputs)?)
        } else {
            None
        };

        let opts = ParallelOptions::from_run(&self.run);
        let preserve_logits = opts.preserve_logits();
        let model = parallelize(handle, &opts)?;

        let per_rank = model.forward(&inputs, labels.as_ref(), preserve_logits)?;

        // All pending device computation must complete before gathering
        // operates on the outputs.
        device
            .synchronize()
            .map_err(|e| ParigateError::backend(format!("device synchronize: {}", e)))?;

        reconcile(&per_rank, self.run.shard_count, &self.policy)
    }
}

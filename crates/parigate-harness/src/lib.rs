//! # parigate-harness
//!
//! The verification pipeline: condition a fixed probe input, execute the
//! (possibly sharded) forward pass, reconcile per-rank outputs into a
//! bundle holding both raw and gathered variants of every field, and
//! persist the bundle as a binary artifact for an external comparator.

pub mod artifact;
pub mod gather;
pub mod inputs;
pub mod pipeline;
pub mod reconcile;

pub use artifact::{ArtifactBundle, ArtifactValue};
pub use gather::AxisGatherPolicy;
pub use inputs::{build_inputs, pad_to_multiple};
pub use pipeline::{synthesize_labels, VerificationPipeline, PROBE_TEXT};
pub use reconcile::{reconcile, OutputBundle, GATHERED_PREFIX};

//! # parigate-parallel
//!
//! Parallelization driver: shard plan arithmetic, the collective process
//! group, column/row/vocab-parallel weight shards, and the registry mapping
//! architecture identifiers to sharding transformations.
//!
//! ## Weight distribution
//!
//! For a linear layer with weight W of shape [out_features, in_features]:
//! - Column-parallel: split along out_features, each rank holds a row block
//! - Row-parallel: split along in_features, each rank holds a column block
//!
//! Column-parallel partials concatenate (all-gather); row-parallel partials
//! sum (all-reduce). Every rank must reach the same collectives in the same
//! order, so sharded execution iterates ranks in lockstep per stage.

pub mod group;
pub mod layers;
pub mod loss;
pub mod nanollama;
pub mod parallelizer;
pub mod plan;

pub use group::ShardGroup;
pub use layers::{shard_column, shard_row, VocabShard};
pub use loss::masked_causal_loss;
pub use nanollama::NanoLlamaParallelizer;
pub use parallelizer::{
    parallelize, register, register_builtin, resolve, ParallelOptions, Parallelizer,
    ShardedForward,
};
pub use plan::ShardPlan;

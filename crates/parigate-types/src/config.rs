//! Run configuration and the environment-variable invocation contract

use crate::{Device, ParigateError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Artifact file name for a sharded run
pub const PARALLEL_ARTIFACT: &str = "parallel.bin";
/// Artifact file name for the single-shard baseline run
pub const ORIGINAL_ARTIFACT: &str = "original.bin";

/// Feature flags for a single run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunFlags {
    /// Instantiate from configuration alone (random weights)
    pub from_config: bool,
    /// Defer full weight materialization until shard placement
    pub lazy_load: bool,
    /// Shard embedding and classification-head layers
    pub parallelize_embeddings: bool,
    /// Shard intermediate activations along the sequence dimension
    pub sequence_parallel: bool,
    /// Synthesize labels and request a loss value
    pub loss_supported: bool,
}

/// A single configuration-field override, `field=value` on the wire.
///
/// The value is kept as a raw string; its type is inferred from the field's
/// existing value when the override is applied to a model configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverride {
    pub field: String,
    pub value: String,
}

impl ConfigOverride {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl std::str::FromStr for ConfigOverride {
    type Err = ParigateError;

    fn from_str(s: &str) -> Result<Self> {
        let (field, value) = s.split_once('=').ok_or_else(|| {
            ParigateError::config(format!("override `{}` is not of the form field=value", s))
        })?;
        if field.trim().is_empty() {
            return Err(ParigateError::config(format!(
                "override `{}` has an empty field name",
                s
            )));
        }
        Ok(Self::new(field.trim(), value.trim()))
    }
}

/// Immutable description of one harness invocation.
///
/// Constructed once from external parameters before the pipeline starts.
/// A shard count of 1 makes the parallelization flags inert: the accessor
/// methods fold that rule in, so callers never observe an active
/// parallelization flag on a baseline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Model architecture identifier, e.g. `nanollama`
    pub architecture: String,
    /// Directory holding config.json / tokenizer.json / model.safetensors
    pub pretrained_source: Option<PathBuf>,
    /// Number of cooperating shards (1 = baseline)
    pub shard_count: usize,
    /// Feature flags
    pub flags: RunFlags,
    /// Typed configuration-field overrides, applied before loading
    pub overrides: Vec<ConfigOverride>,
    /// Fixed random seed for weight materialization
    pub seed: u64,
    /// Identifier keying the collective process group for this run
    pub run_id: String,
    /// Directory the output artifact is written to
    pub output_dir: PathBuf,
    /// Target compute device
    pub device: Device,
}

impl RunConfig {
    /// Validate invariants that must hold before the pipeline starts
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(ParigateError::config("shard count must be >= 1"));
        }
        if !self.flags.from_config && self.pretrained_source.is_none() {
            return Err(ParigateError::config(
                "a pretrained source is required unless from_config is set",
            ));
        }
        if self.run_id.is_empty() {
            return Err(ParigateError::config("run id must not be empty"));
        }
        Ok(())
    }

    /// Whether this run shards the model
    pub fn is_parallel(&self) -> bool {
        self.shard_count > 1
    }

    /// Embedding parallelism, inert on a baseline run
    pub fn parallelize_embeddings(&self) -> bool {
        self.is_parallel() && self.flags.parallelize_embeddings
    }

    /// Sequence parallelism, inert on a baseline run
    pub fn sequence_parallel(&self) -> bool {
        self.is_parallel() && self.flags.sequence_parallel
    }

    /// Name of the artifact file this run writes
    pub fn artifact_name(&self) -> &'static str {
        if self.is_parallel() {
            PARALLEL_ARTIFACT
        } else {
            ORIGINAL_ARTIFACT
        }
    }
}

/// Parse a boolean environment-variable string.
///
/// Accepts true/false, 1/0, yes/no, case-insensitive.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ParigateError::config(format!(
            "`{}` is not a boolean string",
            other
        ))),
    }
}

/// Parse a comma-separated `field=value` override list
pub fn parse_overrides(value: &str) -> Result<Vec<ConfigOverride>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

/// The environment-variable contract the enclosing trigger invokes us with.
///
/// All variables are required unless noted; a missing required variable is a
/// configuration error so a misconfigured trigger fails loudly rather than
/// silently running a default.
#[derive(Debug, Clone)]
pub struct EnvContract {
    pub from_config: bool,
    pub lazy_load: bool,
    pub is_parallel: bool,
    /// Optional comma-separated `field=value` list
    pub config_overwrite: Vec<ConfigOverride>,
    pub parallelize_embeddings: bool,
    pub sequence_parallel_enabled: bool,
    pub computing_loss_is_supported: bool,
    /// Optional; the caller falls back to a fixed id when unset
    pub run_id: Option<String>,
}

impl EnvContract {
    /// Read the contract from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the contract through a lookup function (testable without
    /// touching the process environment)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required_bool = |name: &str| -> Result<bool> {
            let raw = lookup(name).ok_or_else(|| {
                ParigateError::config(format!("missing required environment variable `{}`", name))
            })?;
            parse_bool(&raw)
                .map_err(|_| ParigateError::config(format!("invalid boolean for `{}`", name)))
        };

        let config_overwrite = match lookup("config_overwrite") {
            Some(raw) => parse_overrides(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            from_config: required_bool("from_config")?,
            lazy_load: required_bool("lazy_load")?,
            is_parallel: required_bool("is_parallel")?,
            config_overwrite,
            parallelize_embeddings: required_bool("parallelize_embeddings")?,
            sequence_parallel_enabled: required_bool("sequence_parallel_enabled")?,
            computing_loss_is_supported: required_bool("computing_loss_is_supported")?,
            run_id: lookup("run_id"),
        })
    }

    /// Flags implied by this contract
    pub fn flags(&self) -> RunFlags {
        RunFlags {
            from_config: self.from_config,
            lazy_load: self.lazy_load,
            parallelize_embeddings: self.parallelize_embeddings,
            sequence_parallel: self.sequence_parallel_enabled,
            loss_supported: self.computing_loss_is_supported,
        }
    }
}

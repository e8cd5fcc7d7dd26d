//! Binary artifact writer/reader and the tolerance comparator
//!
//! One artifact per run: the serialized bundle, written to the output
//! directory as `parallel.bin` or `original.bin`. Either a complete bundle
//! is written or nothing is.

use crate::reconcile::{OutputBundle, GATHERED_PREFIX};
use parigate_model::OutputValue;
use parigate_types::{ParigateError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Serializable mirror of an output value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArtifactValue {
    Tensor { shape: Vec<usize>, data: Vec<f32> },
    Sequence(Vec<ArtifactValue>),
    Absent,
}

impl ArtifactValue {
    fn from_output(value: &OutputValue) -> Result<Self> {
        match value {
            OutputValue::Absent => Ok(Self::Absent),
            OutputValue::Sequence(elements) => Ok(Self::Sequence(
                elements
                    .iter()
                    .map(Self::from_output)
                    .collect::<Result<Vec<_>>>()?,
            )),
            OutputValue::Tensor(tensor) => {
                let shape = tensor.dims().to_vec();
                let data = tensor
                    .flatten_all()
                    .and_then(|t| t.to_dtype(candle_core::DType::F32))
                    .and_then(|t| t.to_vec1::<f32>())
                    .map_err(|e| ParigateError::backend(format!("serializing tensor: {}", e)))?;
                Ok(Self::Tensor { shape, data })
            }
        }
    }
}

/// Serializable mirror of an output bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub entries: Vec<(String, ArtifactValue)>,
}

impl ArtifactBundle {
    pub fn from_bundle(bundle: &OutputBundle) -> Result<Self> {
        let entries = bundle
            .iter()
            .map(|(name, value)| Ok((name.to_string(), ArtifactValue::from_output(value)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&ArtifactValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Serialize and write a bundle; returns the artifact path
pub fn write(bundle: &OutputBundle, out_dir: &Path, artifact_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let serializable = ArtifactBundle::from_bundle(bundle)?;
    let bytes = bincode::serialize(&serializable)
        .map_err(|e| ParigateError::serialization(format!("encode bundle: {}", e)))?;
    let path = out_dir.join(artifact_name);
    std::fs::write(&path, bytes)?;
    info!(path = %path.display(), fields = bundle.len(), "artifact written");
    Ok(path)
}

/// Read an artifact back
pub fn read(path: &Path) -> Result<ArtifactBundle> {
    let bytes = std::fs::read(path)?;
    bincode::deserialize(&bytes)
        .map_err(|e| ParigateError::serialization(format!("decode {}: {}", path.display(), e)))
}

/// Elementwise closeness with the usual relative + absolute tolerance.
/// Shapes must match exactly.
pub fn values_match(a: &ArtifactValue, b: &ArtifactValue, rtol: f32, atol: f32) -> bool {
    match (a, b) {
        (ArtifactValue::Absent, ArtifactValue::Absent) => true,
        (ArtifactValue::Sequence(xs), ArtifactValue::Sequence(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| values_match(x, y, rtol, atol))
        }
        (
            ArtifactValue::Tensor {
                shape: shape_a,
                data: data_a,
            },
            ArtifactValue::Tensor {
                shape: shape_b,
                data: data_b,
            },
        ) => {
            shape_a == shape_b
                && data_a
                    .iter()
                    .zip(data_b)
                    .all(|(x, y)| (x - y).abs() <= atol + rtol * y.abs())
        }
        _ => false,
    }
}

/// Comparator over a baseline artifact and a sharded artifact: for every
/// baseline field, either the raw sharded value or its gathered twin must
/// match within tolerance.
pub fn equivalent(
    baseline: &ArtifactBundle,
    sharded: &ArtifactBundle,
    rtol: f32,
    atol: f32,
) -> bool {
    baseline.entries.iter().all(|(name, base_value)| {
        if name.starts_with(GATHERED_PREFIX) {
            return true;
        }
        let raw_matches = sharded
            .get(name)
            .map(|v| values_match(base_value, v, rtol, atol))
            .unwrap_or(false);
        let gathered_matches = sharded
            .get(&format!("{}{}", GATHERED_PREFIX, name))
            .map(|v| values_match(base_value, v, rtol, atol))
            .unwrap_or(false);
        raw_matches || gathered_matches
    })
}

// ============================================================================
// Tests
// ============================================================================

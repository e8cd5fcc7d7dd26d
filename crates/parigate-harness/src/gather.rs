//! Axis-gather policy and the recursive gather over output values

use candle_core::Tensor;
use parigate_model::OutputValue;
use parigate_types::{ParigateError, Result};
use std::collections::HashMap;

/// Which tensor axis each output field concatenates along when gathered.
///
/// Unlisted fields gather along their last dimension. Cached attention
/// state and sequence-sharded activations carry their shard axis at
/// position 1, so both are listed as overrides.
#[derive(Debug, Clone)]
pub struct AxisGatherPolicy {
    overrides: HashMap<String, usize>,
}

impl Default for AxisGatherPolicy {
    fn default() -> Self {
        let mut overrides = HashMap::new();
        overrides.insert("past_key_values".to_string(), 1);
        overrides.insert("hidden_states".to_string(), 1);
        Self { overrides }
    }
}

impl AxisGatherPolicy {
    pub fn empty() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, field: impl Into<String>, axis: usize) -> Self {
        self.overrides.insert(field.into(), axis);
        self
    }

    /// Gather axis for `field` given the rank of the tensor being gathered
    pub fn axis_for(&self, field: &str, tensor_rank: usize) -> usize {
        self.overrides
            .get(field)
            .copied()
            .unwrap_or_else(|| tensor_rank.saturating_sub(1))
    }
}

/// Gather one field's per-rank values into a full value.
///
/// Tensors concatenate along the policy axis; collections gather
/// element-wise, reconstructing a collection of the same shape; absent
/// values stay absent. Mixed kinds across ranks mean the ranks diverged
/// and are an internal error.
pub fn gather_value(
    field: &str,
    parts: &[&OutputValue],
    policy: &AxisGatherPolicy,
) -> Result<OutputValue> {
    let first = parts
        .first()
        .ok_or_else(|| ParigateError::internal("gather over zero ranks"))?;

    match first {
        OutputValue::Absent => {
            if parts.iter().any(|p| !p.is_absent()) {
                return Err(ParigateError::internal(format!(
                    "field `{}`: absent on some ranks only",
                    field
                )));
            }
            Ok(OutputValue::Absent)
        }
        OutputValue::Tensor(_) => {
            let tensors = parts
                .iter()
                .map(|p| p.as_tensor())
                .collect::<Result<Vec<_>>>()
                .map_err(|_| {
                    ParigateError::internal(format!("field `{}`: mixed kinds across ranks", field))
                })?;
            let axis = policy.axis_for(field, tensors[0].rank());
            let gathered = Tensor::cat(&tensors, axis)
                .map_err(|e| ParigateError::backend(format!("gather `{}`: {}", field, e)))?;
            Ok(OutputValue::Tensor(gathered))
        }
        OutputValue::Sequence(first_seq) => {
            let len = first_seq.len();
            let sequences = parts
                .iter()
                .map(|p| match p {
                    OutputValue::Sequence(seq) if seq.len() == len => Ok(seq),
                    OutputValue::Sequence(_) => Err(ParigateError::internal(format!(
                        "field `{}`: collection lengths differ across ranks",
                        field
                    ))),
                    _ => Err(ParigateError::internal(format!(
                        "field `{}`: mixed kinds across ranks",
                        field
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;

            let gathered = (0..len)
                .map(|idx| {
                    let element_parts: Vec<&OutputValue> =
                        sequences.iter().map(|seq| &seq[idx]).collect();
                    gather_value(field, &element_parts, policy)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(OutputValue::Sequence(gathered))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

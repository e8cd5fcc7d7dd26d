//! Model outputs as a tagged traversal-friendly structure

use candle_core::Tensor;
use parigate_types::{ParigateError, Result};

/// Name of the scalar loss field; exempt from gathering
pub const LOSS_FIELD: &str = "loss";

/// One output field value.
///
/// A tagged sum type so reconciliation can walk heterogeneous output shapes
/// with a plain recursive match instead of run-time type inspection.
#[derive(Debug, Clone)]
pub enum OutputValue {
    Tensor(Tensor),
    Sequence(Vec<OutputValue>),
    Absent,
}

impl OutputValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, OutputValue::Absent)
    }

    pub fn as_tensor(&self) -> Result<&Tensor> {
        match self {
            OutputValue::Tensor(t) => Ok(t),
            other => Err(ParigateError::internal(format!(
                "expected tensor output, found {}",
                other.kind()
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutputValue::Tensor(_) => "tensor",
            OutputValue::Sequence(_) => "sequence",
            OutputValue::Absent => "absent",
        }
    }
}

/// Ordered mapping from output field name to value, one per rank and pass
#[derive(Debug, Clone, Default)]
pub struct ModelOutputs {
    entries: Vec<(String, OutputValue)>,
}

impl ModelOutputs {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: OutputValue) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

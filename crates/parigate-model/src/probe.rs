//! Probe input: named input channels for one forward pass

use candle_core::{Device as CandleDevice, Tensor};
use parigate_types::{ParigateError, Result};

/// Ordered mapping from input-channel name to tensor.
///
/// Built once per run from the fixed probe text. Channel tensors share the
/// batch-major layout `[batch, seq]`.
#[derive(Debug, Clone)]
pub struct ProbeInput {
    channels: Vec<(String, Tensor)>,
}

impl ProbeInput {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.channels.push((name.into(), tensor));
    }

    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.channels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .ok_or_else(|| ParigateError::shape_mismatch(format!("missing input channel `{}`", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.channels.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Sequence length shared by all channels
    pub fn seq_len(&self) -> Result<usize> {
        let (name, first) = self
            .channels
            .first()
            .ok_or_else(|| ParigateError::shape_mismatch("probe input has no channels"))?;
        first
            .dim(1)
            .map_err(|e| ParigateError::shape_mismatch(format!("channel `{}`: {}", name, e)))
    }

    /// Move every channel onto `device`
    pub fn to_device(&self, device: &CandleDevice) -> Result<Self> {
        let channels = self
            .channels
            .iter()
            .map(|(name, t)| {
                let moved = t.to_device(device).map_err(|e| {
                    ParigateError::backend(format!("moving channel `{}`: {}", name, e))
                })?;
                Ok((name.clone(), moved))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { channels })
    }
}

impl Default for ProbeInput {
    fn default() -> Self {
        Self::new()
    }
}

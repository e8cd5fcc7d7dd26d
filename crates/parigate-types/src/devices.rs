//! Device types

use serde::{Deserialize, Serialize};

/// Compute device for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// CPU device
    Cpu,
    /// NVIDIA CUDA device with device index
    Cuda(usize),
    /// Apple GPU using Metal
    Metal,
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl Device {
    /// Check if device is GPU-based
    pub fn is_gpu(&self) -> bool {
        !matches!(self, Device::Cpu)
    }

    /// Get device index for GPU devices
    pub fn index(&self) -> Option<usize> {
        match self {
            Device::Cuda(idx) => Some(*idx),
            _ => None,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{}", idx),
            Device::Metal => write!(f, "metal"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = crate::ParigateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if s == "metal" {
            return Ok(Device::Metal);
        }
        if let Some(idx) = s.strip_prefix("cuda:") {
            let idx = idx
                .parse::<usize>()
                .map_err(|_| crate::ParigateError::config(format!("invalid device: {}", s)))?;
            return Ok(Device::Cuda(idx));
        }
        if s == "cuda" {
            return Ok(Device::Cuda(0));
        }
        Err(crate::ParigateError::config(format!(
            "invalid device: {}",
            s
        )))
    }
}

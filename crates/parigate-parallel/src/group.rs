//! Collective process group, established once per run
//!
//! Ranks cooperate within a single process here: each collective receives
//! one tensor per rank and combines them deterministically. A call that
//! does not present exactly one part per rank means some rank diverged from
//! the lockstep schedule, which on a real communication backend is the
//! deadlock case; it is reported as a collective timeout instead of
//! hanging.

use candle_core::Tensor;
use parigate_types::{ParigateError, Result};
use tracing::{debug, info};

/// Collective-communication group keyed by a run identifier
pub struct ShardGroup {
    run_id: String,
    world_size: usize,
}

impl ShardGroup {
    /// Initialize the group for a run. Called once at pipeline start.
    pub fn init(run_id: impl Into<String>, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(ParigateError::config("world_size must be > 0"));
        }
        let run_id = run_id.into();
        info!(run_id = %run_id, world_size, "initializing process group");
        Ok(Self { run_id, world_size })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    fn check_participation(&self, op: &str, parts: usize) -> Result<()> {
        if parts != self.world_size {
            return Err(ParigateError::collective_timeout(format!(
                "{}: {} rank(s) reached the collective, expected {}",
                op, parts, self.world_size
            )));
        }
        Ok(())
    }

    /// Concatenate per-rank partial tensors along `dim`
    pub fn all_gather(&self, parts: &[Tensor], dim: usize) -> Result<Tensor> {
        self.check_participation("all_gather", parts.len())?;
        if self.world_size == 1 {
            return Ok(parts[0].clone());
        }
        debug!(dim, world_size = self.world_size, "all_gather");
        Tensor::cat(parts, dim)
            .map_err(|e| ParigateError::backend(format!("all_gather concat: {}", e)))
    }

    /// Sum per-rank partial tensors elementwise
    pub fn all_reduce_sum(&self, parts: &[Tensor]) -> Result<Tensor> {
        self.check_participation("all_reduce", parts.len())?;
        let mut acc = parts[0].clone();
        for part in &parts[1..] {
            acc = (&acc + part)
                .map_err(|e| ParigateError::backend(format!("all_reduce sum: {}", e)))?;
        }
        Ok(acc)
    }

    /// Split a full tensor into one contiguous slice per rank along `dim`
    pub fn scatter(&self, full: &Tensor, dim: usize) -> Result<Vec<Tensor>> {
        let dim_size = full
            .dim(dim)
            .map_err(|e| ParigateError::backend(format!("scatter: {}", e)))?;
        if dim_size % self.world_size != 0 {
            return Err(ParigateError::shape_mismatch(format!(
                "scatter: dimension {} not divisible by world_size {}",
                dim_size, self.world_size
            )));
        }
        let slice = dim_size / self.world_size;
        (0..self.world_size)
            .map(|rank| {
                full.narrow(dim, rank * slice, slice)
                    .and_then(|t| t.contiguous())
                    .map_err(|e| ParigateError::backend(format!("scatter narrow: {}", e)))
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    fn t(data: &[f32], shape: (usize, usize)) -> Tensor {
        Tensor::from_vec(data.to_vec(), shape, &Device::Cpu).unwrap()
    }

    #[test]
    fn all_gather_concatenates_along_requested_axis() {
        let group = ShardGroup::init("test", 2).unwrap();
        let a = t(&[1.0, 2.0], (1, 2));
        let b = t(&[3.0, 4.0], (1, 2));

        let gathered = group.all_gather(&[a.clone(), b.clone()], 1).unwrap();
        assert_eq!(gathered.dims(), &[1, 4]);
        assert_eq!(
            gathered.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );

        let gathered = group.all_gather(&[a, b], 0).unwrap();
        assert_eq!(gathered.dims(), &[2, 2]);
    }

    #[test]
    fn all_reduce_sums_elementwise() {
        let group = ShardGroup::init("test", 3).unwrap();
        let parts = vec![
            t(&[1.0, 1.0], (1, 2)),
            t(&[2.0, 2.0], (1, 2)),
            t(&[3.0, 3.0], (1, 2)),
        ];
        let reduced = group.all_reduce_sum(&parts).unwrap();
        assert_eq!(
            reduced.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![6.0, 6.0]
        );
    }

    #[test]
    fn scatter_then_gather_is_identity() {
        let group = ShardGroup::init("test", 2).unwrap();
        let full = t(&[1.0, 2.0, 3.0, 4.0], (1, 4));
        let parts = group.scatter(&full, 1).unwrap();
        assert_eq!(parts.len(), 2);
        let rebuilt = group.all_gather(&parts, 1).unwrap();
        assert_eq!(
            rebuilt.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn missing_rank_is_detected_not_deadlocked() {
        let group = ShardGroup::init("test", 2).unwrap();
        let lone = vec![t(&[1.0], (1, 1))];
        assert!(group.all_gather(&lone, 0).is_err());
        assert!(group.all_reduce_sum(&lone).is_err());
    }

    #[test]
    fn scatter_rejects_indivisible_dimension() {
        let group = ShardGroup::init("test", 2).unwrap();
        let odd = t(&[1.0, 2.0, 3.0], (1, 3));
        assert!(matches!(
            group.scatter(&odd, 1).unwrap_err(),
            ParigateError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn single_rank_collectives_are_identity() {
        let group = ShardGroup::init("baseline", 1).unwrap();
        let only = t(&[5.0, 6.0], (1, 2));
        let gathered = group.all_gather(std::slice::from_ref(&only), 1).unwrap();
        assert_eq!(
            gathered.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![5.0, 6.0]
        );
    }
}

//! Shard plan arithmetic

use parigate_types::{ParigateError, Result};

/// Placement of one rank within a shard group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    /// Number of cooperating ranks
    pub world_size: usize,
    /// This rank's index (0-based)
    pub rank: usize,
}

impl ShardPlan {
    pub fn new(world_size: usize, rank: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(ParigateError::config("world_size must be > 0"));
        }
        if rank >= world_size {
            return Err(ParigateError::config(format!(
                "rank {} >= world_size {}",
                rank, world_size
            )));
        }
        Ok(Self { world_size, rank })
    }

    /// Plans for every rank of a group
    pub fn all(world_size: usize) -> Result<Vec<Self>> {
        (0..world_size).map(|rank| Self::new(world_size, rank)).collect()
    }

    /// Check if sharding is active
    pub fn is_parallel(&self) -> bool {
        self.world_size > 1
    }

    /// Size of this rank's slice of a dimension
    pub fn shard_size(&self, dim_size: usize) -> Result<usize> {
        if dim_size % self.world_size != 0 {
            return Err(ParigateError::shape_mismatch(format!(
                "dimension {} not divisible by world_size {}",
                dim_size, self.world_size
            )));
        }
        Ok(dim_size / self.world_size)
    }

    /// Offset of this rank's slice within a dimension
    pub fn shard_offset(&self, dim_size: usize) -> Result<usize> {
        Ok(self.shard_size(dim_size)? * self.rank)
    }

    /// Range `(start, end)` of this rank's slice
    pub fn shard_range(&self, dim_size: usize) -> Result<(usize, usize)> {
        let size = self.shard_size(dim_size)?;
        let start = size * self.rank;
        Ok((start, start + size))
    }
}

// ============================================================================
// Tests
// ============================================================================

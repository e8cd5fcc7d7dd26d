//! Sharded layer primitives
//!
//! Weight slices are taken from the full host tensors and moved to the
//! target device, so a lazy-loaded model never materializes a full replica
//! per rank on the device.

use crate::plan::ShardPlan;
use candle_core::{DType, Device as CandleDevice, Tensor};
use parigate_types::{ParigateError, Result};

fn backend_err(context: &str) -> impl Fn(candle_core::Error) -> ParigateError + '_ {
    move |e| ParigateError::backend(format!("{}: {}", context, e))
}

/// This rank's row block of a column-parallel weight [out, in]
pub fn shard_column(weight: &Tensor, plan: &ShardPlan, device: &CandleDevice) -> Result<Tensor> {
    let out = weight.dim(0).map_err(backend_err("column shard"))?;
    let (start, end) = plan.shard_range(out)?;
    weight
        .narrow(0, start, end - start)
        .and_then(|t| t.contiguous())
        .and_then(|t| t.to_device(device))
        .map_err(backend_err("column shard"))
}

/// This rank's column block of a row-parallel weight [out, in]
pub fn shard_row(weight: &Tensor, plan: &ShardPlan, device: &CandleDevice) -> Result<Tensor> {
    let inp = weight.dim(1).map_err(backend_err("row shard"))?;
    let (start, end) = plan.shard_range(inp)?;
    weight
        .narrow(1, start, end - start)
        .and_then(|t| t.contiguous())
        .and_then(|t| t.to_device(device))
        .map_err(backend_err("row shard"))
}

/// Bias-free linear: `x @ W^T` with a 2D weight [out, in]
pub fn linear(x: &Tensor, weight: &Tensor) -> Result<Tensor> {
    weight
        .t()
        .and_then(|wt| x.broadcast_matmul(&wt))
        .map_err(backend_err("linear"))
}

/// RMS normalization over the last dimension
pub fn rms_norm(x: &Tensor, weight: &Tensor, eps: f64) -> Result<Tensor> {
    let last = x.rank() - 1;
    let mean_sq = x
        .sqr()
        .and_then(|t| t.mean_keepdim(last))
        .map_err(backend_err("rms_norm"))?;
    let denom = (mean_sq + eps)
        .and_then(|t| t.sqrt())
        .map_err(backend_err("rms_norm"))?;
    x.broadcast_div(&denom)
        .and_then(|t| t.broadcast_mul(weight))
        .map_err(backend_err("rms_norm"))
}

/// One rank's vocabulary partition of an embedding table.
///
/// Lookup returns rows for ids inside `[start, end)` and zero rows for ids
/// owned by other ranks; summing the per-rank partials reconstructs the
/// full lookup.
pub struct VocabShard {
    weight: Tensor,
    start: usize,
    end: usize,
}

impl VocabShard {
    pub fn new(full_weight: &Tensor, plan: &ShardPlan, device: &CandleDevice) -> Result<Self> {
        let vocab = full_weight.dim(0).map_err(backend_err("vocab shard"))?;
        let (start, end) = plan.shard_range(vocab)?;
        let weight = full_weight
            .narrow(0, start, end - start)
            .and_then(|t| t.contiguous())
            .and_then(|t| t.to_device(device))
            .map_err(backend_err("vocab shard"))?;
        Ok(Self { weight, start, end })
    }

    /// The weight slice this rank owns, for vocab-parallel projections
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Partial lookup: `ids` is `[batch, seq]` of u32
    pub fn lookup(&self, ids: &Tensor) -> Result<Tensor> {
        let err = backend_err("vocab lookup");
        let (batch, seq) = ids.dims2().map_err(&err)?;
        let hidden = self.weight.dim(1).map_err(&err)?;

        let flat = ids.flatten_all().map_err(&err)?;
        let ids_i = flat.to_dtype(DType::I64).map_err(&err)?;

        let ge = ids_i.ge(self.start as i64).map_err(&err)?;
        let lt = ids_i.lt(self.end as i64).map_err(&err)?;
        let in_range = (&ge * &lt)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.reshape((batch * seq, 1)))
            .map_err(&err)?;

        let clamped = ids_i
            .clamp(self.start as i64, self.end as i64 - 1)
            .map_err(&err)?;
        let offset = Tensor::full(self.start as i64, clamped.dims(), clamped.device())
            .map_err(&err)?;
        let local = clamped
            .sub(&offset)
            .and_then(|t| t.to_dtype(DType::U32))
            .map_err(&err)?;

        let rows = self.weight.index_select(&local, 0).map_err(&err)?;
        rows.broadcast_mul(&in_range)
            .and_then(|t| t.reshape((batch, seq, hidden)))
            .map_err(&err)
    }
}

/// Full (replicated) embedding lookup
pub fn embed_lookup(weight: &Tensor, ids: &Tensor) -> Result<Tensor> {
    let err = backend_err("embed lookup");
    let (batch, seq) = ids.dims2().map_err(&err)?;
    let hidden = weight.dim(1).map_err(&err)?;
    let flat = ids.flatten_all().map_err(&err)?;
    weight
        .index_select(&flat, 0)
        .and_then(|t| t.reshape((batch, seq, hidden)))
        .map_err(&err)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::ShardGroup;

    fn device() -> CandleDevice {
        CandleDevice::Cpu
    }

    fn arange(rows: usize, cols: usize) -> Tensor {
        let data: Vec<f32> = (0..rows * cols).map(|i| i as f32 * 0.1).collect();
        Tensor::from_vec(data, (rows, cols), &device()).unwrap()
    }

    fn close(a: &[f32], b: &[f32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= tol, "{} vs {}", x, y);
        }
    }

    #[test]
    fn column_shards_gather_to_the_full_projection() {
        let weight = arange(8, 4);
        let x = arange(1, 4).reshape((1, 1, 4)).unwrap();
        let full = linear(&x, &weight).unwrap();

        let group = ShardGroup::init("t", 2).unwrap();
        let parts: Vec<Tensor> = ShardPlan::all(2)
            .unwrap()
            .iter()
            .map(|plan| {
                let shard = shard_column(&weight, plan, &device()).unwrap();
                linear(&x, &shard).unwrap()
            })
            .collect();
        let gathered = group.all_gather(&parts, 2).unwrap();

        close(
            &gathered.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            &full.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            1e-6,
        );
    }

    #[test]
    fn row_shards_reduce_to_the_full_projection() {
        let weight = arange(4, 8);
        let x = arange(1, 8).reshape((1, 1, 8)).unwrap();
        let full = linear(&x, &weight).unwrap();

        let group = ShardGroup::init("t", 4).unwrap();
        let parts: Vec<Tensor> = ShardPlan::all(4)
            .unwrap()
            .iter()
            .map(|plan| {
                let shard = shard_row(&weight, plan, &device()).unwrap();
                let x_slice = plan.shard_range(8).unwrap();
                let x_local = x.narrow(2, x_slice.0, x_slice.1 - x_slice.0).unwrap();
                linear(&x_local, &shard).unwrap()
            })
            .collect();
        let reduced = group.all_reduce_sum(&parts).unwrap();

        close(
            &reduced.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            &full.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            1e-5,
        );
    }

    #[test]
    fn vocab_shards_reduce_to_the_full_lookup() {
        let table = arange(8, 4);
        let ids = Tensor::from_vec(vec![0u32, 3, 5, 7], (1, 4), &device()).unwrap();
        let full = embed_lookup(&table, &ids).unwrap();

        let group = ShardGroup::init("t", 2).unwrap();
        let parts: Vec<Tensor> = ShardPlan::all(2)
            .unwrap()
            .iter()
            .map(|plan| {
                VocabShard::new(&table, plan, &device())
                    .unwrap()
                    .lookup(&ids)
                    .unwrap()
            })
            .collect();
        let reduced = group.all_reduce_sum(&parts).unwrap();

        close(
            &reduced.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            &full.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            1e-6,
        );
    }

    #[test]
    fn rms_norm_matches_direct_computation() {
        let x = Tensor::from_vec(vec![3.0f32, 4.0], (1, 1, 2), &device()).unwrap();
        let w = Tensor::from_vec(vec![1.0f32, 1.0], 2, &device()).unwrap();
        let normed = rms_norm(&x, &w, 0.0).unwrap();
        let got = normed.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // rms = sqrt((9 + 16) / 2)
        let rms = (12.5f32).sqrt();
        close(&got, &[3.0 / rms, 4.0 / rms], 1e-6);
    }
}

//! Loss-computation primitive
//!
//! Causal-LM objective with padding excluded, so a padded sharded run and
//! an unpadded baseline report the same value. The `preserve_input` flag is
//! threaded in explicitly by the parallelization driver: when the raw
//! logits must stay observable in the output bundle, the loss operates on a
//! detached copy.

use candle_core::{DType, Tensor, D};
use parigate_types::{ParigateError, Result};

fn err(e: candle_core::Error) -> ParigateError {
    ParigateError::backend(format!("loss: {}", e))
}

/// Next-token cross entropy over positions the attention mask marks valid.
///
/// `logits` is `[1, seq, vocab]`, `labels` and `attention_mask` are
/// `[1, seq]`. Returns a scalar tensor.
pub fn masked_causal_loss(
    logits: &Tensor,
    labels: &Tensor,
    attention_mask: &Tensor,
    preserve_input: bool,
) -> Result<Tensor> {
    let (_, seq, vocab) = logits.dims3().map_err(err)?;
    if seq < 2 {
        return Err(ParigateError::shape_mismatch(
            "causal loss needs a sequence of at least 2 tokens",
        ));
    }

    let work = if preserve_input {
        logits.copy().map_err(err)?
    } else {
        logits.clone()
    };

    // Shift: predict token t+1 from position t.
    let pred = work
        .narrow(1, 0, seq - 1)
        .and_then(|t| t.reshape((seq - 1, vocab)))
        .map_err(err)?;
    let targets = labels
        .narrow(1, 1, seq - 1)
        .and_then(|t| t.flatten_all())
        .and_then(|t| t.to_dtype(DType::U32))
        .map_err(err)?;
    let valid = attention_mask
        .narrow(1, 1, seq - 1)
        .and_then(|t| t.flatten_all())
        .and_then(|t| t.to_dtype(DType::F32))
        .map_err(err)?;

    let log_probs = candle_nn::ops::log_softmax(&pred, D::Minus1).map_err(err)?;
    let picked = log_probs
        .gather(&targets.unsqueeze(1).map_err(err)?, 1)
        .and_then(|t| t.squeeze(1))
        .map_err(err)?;

    let nll = picked.neg().map_err(err)?;
    let total = (&nll * &valid).and_then(|t| t.sum_all()).map_err(err)?;
    let count = valid.sum_all().map_err(err)?;

    let count_value = count.to_scalar::<f32>().map_err(err)?;
    if count_value == 0.0 {
        return Err(ParigateError::shape_mismatch(
            "attention mask leaves no valid loss positions",
        ));
    }
    (&total / &count).map_err(err)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn uniform_logits_give_log_vocab() {
        let vocab = 8;
        let logits = Tensor::zeros((1, 4, vocab), DType::F32, &device()).unwrap();
        let labels = Tensor::from_vec(vec![1u32, 2, 3, 4], (1, 4), &device()).unwrap();
        let mask = Tensor::from_vec(vec![1u32, 1, 1, 1], (1, 4), &device()).unwrap();

        let loss = masked_causal_loss(&logits, &labels, &mask, false).unwrap();
        let value = loss.to_scalar::<f32>().unwrap();
        assert!((value - (vocab as f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn padded_positions_do_not_change_the_loss() {
        let vocab = 8;
        let base_logits = Tensor::zeros((1, 4, vocab), DType::F32, &device()).unwrap();
        let labels = Tensor::from_vec(vec![1u32, 2, 3, 4], (1, 4), &device()).unwrap();
        let mask = Tensor::from_vec(vec![1u32, 1, 1, 1], (1, 4), &device()).unwrap();
        let base = masked_causal_loss(&base_logits, &labels, &mask, false)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        // Same content right-padded by two positions with garbage logits.
        let noise = Tensor::from_vec(
            (0..2 * vocab).map(|i| i as f32).collect::<Vec<_>>(),
            (1, 2, vocab),
            &device(),
        )
        .unwrap();
        let padded_logits = Tensor::cat(&[&base_logits, &noise], 1).unwrap();
        let padded_labels =
            Tensor::from_vec(vec![1u32, 2, 3, 4, 0, 0], (1, 6), &device()).unwrap();
        let padded_mask = Tensor::from_vec(vec![1u32, 1, 1, 1, 0, 0], (1, 6), &device()).unwrap();
        let padded = masked_causal_loss(&padded_logits, &padded_labels, &padded_mask, false)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        assert!((base - padded).abs() < 1e-6, "{} vs {}", base, padded);
    }

    #[test]
    fn preserve_input_leaves_logits_readable() {
        let logits = Tensor::zeros((1, 3, 4), DType::F32, &device()).unwrap();
        let labels = Tensor::from_vec(vec![0u32, 1, 2], (1, 3), &device()).unwrap();
        let mask = Tensor::from_vec(vec![1u32, 1, 1], (1, 3), &device()).unwrap();

        let _ = masked_causal_loss(&logits, &labels, &mask, true).unwrap();
        let after = logits.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(after.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn fully_masked_input_is_rejected() {
        let logits = Tensor::zeros((1, 3, 4), DType::F32, &device()).unwrap();
        let labels = Tensor::from_vec(vec![0u32, 1, 2], (1, 3), &device()).unwrap();
        let mask = Tensor::from_vec(vec![1u32, 0, 0], (1, 3), &device()).unwrap();
        assert!(masked_causal_loss(&logits, &labels, &mask, false).is_err());
    }
}

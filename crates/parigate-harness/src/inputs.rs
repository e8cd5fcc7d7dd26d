//! Input conditioner
//!
//! Builds the probe input from a fixed sentence: tokenize, align the
//! sequence dimension to the shard count when sequence parallelism is
//! active, select the channels the model's forward entry point declares,
//! and place everything on the target device.

use candle_core::{DType, Device as CandleDevice, Tensor};
use parigate_model::{ForwardSpec, ProbeInput, TextTokenizer};
use parigate_types::{ParigateError, Result};
use tracing::debug;

fn err(e: candle_core::Error) -> ParigateError {
    ParigateError::backend(format!("input conditioning: {}", e))
}

/// Right-pad `dim` of a tensor until its length is a multiple of
/// `multiple`, filling with `pad_value`. A length already aligned is left
/// untouched, so the operation is idempotent.
pub fn pad_to_multiple(
    tensor: &Tensor,
    dim: usize,
    multiple: usize,
    pad_value: u32,
) -> Result<Tensor> {
    if multiple == 0 {
        return Err(ParigateError::shape_mismatch("pad multiple must be > 0"));
    }
    let len = tensor.dim(dim).map_err(err)?;
    let pad = (multiple - len % multiple) % multiple;
    if pad == 0 {
        return Ok(tensor.clone());
    }

    let mut filler_dims = tensor.dims().to_vec();
    filler_dims[dim] = pad;
    let filler = match tensor.dtype() {
        DType::U32 => Tensor::full(pad_value, filler_dims.as_slice(), tensor.device()),
        DType::I64 => Tensor::full(pad_value as i64, filler_dims.as_slice(), tensor.device()),
        DType::F32 => Tensor::full(pad_value as f32, filler_dims.as_slice(), tensor.device()),
        other => {
            return Err(ParigateError::shape_mismatch(format!(
                "cannot pad dtype {:?}",
                other
            )))
        }
    }
    .map_err(err)?;

    Tensor::cat(&[tensor, &filler], dim).map_err(err)
}

/// Build the conditioned probe input for one run.
///
/// Under sequence parallelism every channel's sequence dimension becomes a
/// multiple of the shard count: ids pad with the tokenizer's pad token,
/// the attention mask pads with zero so padded positions stay excluded.
pub fn build_inputs(
    probe_text: &str,
    tokenizer: &dyn TextTokenizer,
    spec: &ForwardSpec,
    shard_count: usize,
    sequence_parallel: bool,
    device: &CandleDevice,
) -> Result<ProbeInput> {
    let encoded = tokenizer.encode(probe_text)?;
    let len = encoded.input_ids.len();
    let cpu = CandleDevice::Cpu;

    let mut full = ProbeInput::new();
    full.insert(
        "input_ids",
        Tensor::from_vec(encoded.input_ids, (1, len), &cpu).map_err(err)?,
    );
    full.insert(
        "attention_mask",
        Tensor::from_vec(encoded.attention_mask, (1, len), &cpu).map_err(err)?,
    );

    let full = if sequence_parallel && shard_count > 1 {
        let mut padded = ProbeInput::new();
        for (name, tensor) in full.iter() {
            let pad_value = if name == "input_ids" {
                tokenizer.pad_token_id()
            } else {
                0
            };
            padded.insert(name, pad_to_multiple(tensor, 1, shard_count, pad_value)?);
        }
        debug!(
            original_len = len,
            padded_len = padded.seq_len()?,
            shard_count,
            "sequence padded for sharding"
        );
        padded
    } else {
        full
    };

    // Keep only the channels the forward entry point accepts; derive
    // decoder channels from the same probe for encoder-decoder models.
    let mut selected = ProbeInput::new();
    for (name, tensor) in full.iter() {
        if spec.accepts(name) {
            selected.insert(name, tensor.clone());
        }
    }
    if spec.is_encoder_decoder {
        for name in &spec.input_names {
            if let Some(base) = name.strip_prefix("decoder_") {
                if full.contains(base) && !selected.contains(name) {
                    selected.insert(name.clone(), full.get(base)?.clone());
                }
            }
        }
    }
    if selected.is_empty() {
        return Err(ParigateError::shape_mismatch(
            "forward entry point accepts none of the probe channels",
        ));
    }

    selected.to_device(device)
}

// ============================================================================
// Tests
// ============================================================================

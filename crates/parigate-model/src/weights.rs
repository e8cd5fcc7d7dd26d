//! Weight store: named full-size parameter tensors
//!
//! Weights are materialized on the host in a fixed order from a seeded RNG
//! (config-only runs) or read from a safetensors file (pretrained runs).
//! Placement on the compute device happens either eagerly at load time or,
//! under a lazy scope, per shard slice during parallelization.

use crate::config::ModelConfig;
use candle_core::{Device as CandleDevice, Tensor};
use parigate_types::{ParigateError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const INIT_RANGE: f32 = 0.02;

/// Named parameter tensors in materialization order
pub struct WeightStore {
    entries: Vec<(String, Tensor)>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.entries.push((name.into(), tensor));
    }

    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .ok_or_else(|| ParigateError::internal(format!("missing weight `{}`", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move every tensor onto `device`
    pub fn place(&mut self, device: &CandleDevice) -> Result<()> {
        for (name, tensor) in &mut self.entries {
            *tensor = tensor
                .to_device(device)
                .map_err(|e| ParigateError::backend(format!("placing `{}`: {}", name, e)))?;
        }
        Ok(())
    }

    /// Materialize random weights for the `nanollama` architecture.
    ///
    /// The RNG is seeded once and tensors are generated in a fixed order,
    /// so two calls with the same seed and configuration are bit-identical.
    pub fn init_nanollama(config: &ModelConfig, seed: u64) -> Result<Self> {
        let device = CandleDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = Self::new();

        let h = config.hidden_size;
        let v = config.vocab_size;
        let i = config.intermediate_size;

        store.insert(
            "model.embed_tokens.weight",
            uniform(&mut rng, (v, h), &device)?,
        );
        store.insert(
            "model.embed_positions.weight",
            uniform(&mut rng, (config.max_position_embeddings, h), &device)?,
        );

        for layer in 0..config.num_hidden_layers {
            let prefix = format!("model.layers.{}", layer);
            store.insert(
                format!("{}.input_layernorm.weight", prefix),
                ones(h, &device)?,
            );
            for proj in ["q_proj", "k_proj", "v_proj", "o_proj"] {
                store.insert(
                    format!("{}.self_attn.{}.weight", prefix, proj),
                    uniform(&mut rng, (h, h), &device)?,
                );
            }
            store.insert(
                format!("{}.post_attention_layernorm.weight", prefix),
                ones(h, &device)?,
            );
            store.insert(
                format!("{}.mlp.gate_proj.weight", prefix),
                uniform(&mut rng, (i, h), &device)?,
            );
            store.insert(
                format!("{}.mlp.up_proj.weight", prefix),
                uniform(&mut rng, (i, h), &device)?,
            );
            store.insert(
                format!("{}.mlp.down_proj.weight", prefix),
                uniform(&mut rng, (h, i), &device)?,
            );
        }

        store.insert("model.norm.weight", ones(h, &device)?);
        if !config.tie_word_embeddings {
            store.insert("lm_head.weight", uniform(&mut rng, (v, h), &device)?);
        }

        Ok(store)
    }

    /// Read weights from a safetensors file onto the host
    pub fn load_safetensors(path: &Path) -> Result<Self> {
        let tensors = candle_core::safetensors::load(path, &CandleDevice::Cpu).map_err(|e| {
            ParigateError::model_instantiation(format!("read {} failed: {}", path.display(), e))
        })?;
        let mut entries: Vec<(String, Tensor)> = tensors.into_iter().collect();
        // HashMap order is not deterministic; the store order is.
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(Self { entries })
    }

    /// Flatten every tensor to host f32 data, in store order. Determinism
    /// checks compare these bit-for-bit.
    pub fn to_host_vecs(&self) -> Result<Vec<(String, Vec<f32>)>> {
        self.entries
            .iter()
            .map(|(name, t)| {
                let data = t
                    .flatten_all()
                    .and_then(|t| t.to_dtype(candle_core::DType::F32))
                    .and_then(|t| t.to_vec1::<f32>())
                    .map_err(|e| {
                        ParigateError::backend(format!("reading `{}` to host: {}", name, e))
                    })?;
                Ok((name.clone(), data))
            })
            .collect()
    }
}

impl Default for WeightStore {
    fn default() -> Self {
        Self::new()
    }
}

fn uniform(rng: &mut StdRng, shape: (usize, usize), device: &CandleDevice) -> Result<Tensor> {
    let (rows, cols) = shape;
    let data: Vec<f32> = (0..rows * cols)
        .map(|_| rng.gen_range(-INIT_RANGE..INIT_RANGE))
        .collect();
    Tensor::from_vec(data, (rows, cols), device)
        .map_err(|e| ParigateError::backend(format!("tensor init: {}", e)))
}

fn ones(len: usize, device: &CandleDevice) -> Result<Tensor> {
    Tensor::ones(len, candle_core::DType::F32, device)
        .map_err(|e| ParigateError::backend(format!("tensor init: {}", e)))
}

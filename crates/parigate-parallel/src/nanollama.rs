//! Sharded execution of the `nanollama` architecture
//!
//! A compact Llama-style causal LM: token + learned position embeddings,
//! pre-norm decoder blocks (RMS norm, causal multi-head attention,
//! SiLU-gated MLP), final norm, LM head. Attention q/k/v and MLP gate/up
//! projections are column-parallel, o and down projections row-parallel,
//! embedding and LM head optionally vocab-parallel.
//!
//! The forward pass iterates ranks in lockstep per stage: partial results
//! for every rank are computed before the stage's collective runs, so all
//! ranks reach the same collectives in the same order regardless of rank
//! count.

use crate::group::ShardGroup;
use crate::layers::{embed_lookup, linear, rms_norm, shard_column, shard_row, VocabShard};
use crate::loss::masked_causal_loss;
use crate::parallelizer::{ParallelOptions, Parallelizer, ShardedForward};
use crate::plan::ShardPlan;
use candle_core::{Device as CandleDevice, Tensor};
use parigate_model::{ModelConfig, ModelHandle, ModelOutputs, OutputValue, ProbeInput, LOSS_FIELD};
use parigate_types::{ParigateError, Result};
use tracing::debug;

const MASK_VALUE: f32 = -1e9;

fn err(e: candle_core::Error) -> ParigateError {
    ParigateError::backend(format!("forward: {}", e))
}

/// Sharding transformation for the `nanollama` family
pub struct NanoLlamaParallelizer;

impl Parallelizer for NanoLlamaParallelizer {
    fn architecture(&self) -> &str {
        "nanollama"
    }

    fn parallelize(
        &self,
        handle: ModelHandle,
        opts: &ParallelOptions,
    ) -> Result<Box<dyn ShardedForward>> {
        Ok(Box::new(ShardedNanoLlama::new(handle, opts)?))
    }
}

/// One rank's slice of a decoder block
struct RankLayer {
    q: Tensor,
    k: Tensor,
    v: Tensor,
    o: Tensor,
    gate: Tensor,
    up: Tensor,
    down: Tensor,
}

/// One rank's owned parameters
struct RankShard {
    layers: Vec<RankLayer>,
    /// Vocab partition of the embedding table, when embeddings are sharded
    embed: Option<VocabShard>,
    /// Vocab partition of the LM head rows, when embeddings are sharded
    lm_head: Option<Tensor>,
}

/// Parameters replicated on every rank
struct ReplicatedWeights {
    embed_tokens: Tensor,
    embed_positions: Tensor,
    input_ln: Vec<Tensor>,
    post_ln: Vec<Tensor>,
    final_norm: Tensor,
    lm_head: Tensor,
}

pub struct ShardedNanoLlama {
    config: ModelConfig,
    group: ShardGroup,
    ranks: Vec<RankShard>,
    replicated: ReplicatedWeights,
    parallel_embeddings: bool,
    sequence_parallel: bool,
    device: CandleDevice,
}

impl ShardedNanoLlama {
    pub fn new(handle: ModelHandle, opts: &ParallelOptions) -> Result<Self> {
        let config = handle.config.clone();
        let n = opts.shard_count;
        let group = ShardGroup::init(opts.run_id.clone(), n)?;
        let device = handle.device.clone();
        let store = &handle.weights;

        let plans = ShardPlan::all(n)?;
        // Divisibility is checked up front so a bad shard count fails
        // before any device allocation.
        plans[0].shard_size(config.num_attention_heads)?;
        plans[0].shard_size(config.intermediate_size)?;
        if opts.parallelize_embeddings {
            plans[0].shard_size(config.vocab_size)?;
        }

        let lm_head_name = if config.tie_word_embeddings {
            "model.embed_tokens.weight"
        } else {
            "lm_head.weight"
        };

        let on_device = |t: &Tensor| -> Result<Tensor> {
            t.to_device(&device).map_err(err)
        };

        let mut input_ln = Vec::with_capacity(config.num_hidden_layers);
        let mut post_ln = Vec::with_capacity(config.num_hidden_layers);
        for layer in 0..config.num_hidden_layers {
            let prefix = format!("model.layers.{}", layer);
            input_ln.push(on_device(
                store.get(&format!("{}.input_layernorm.weight", prefix))?,
            )?);
            post_ln.push(on_device(
                store.get(&format!("{}.post_attention_layernorm.weight", prefix))?,
            )?);
        }

        let replicated = ReplicatedWeights {
            embed_tokens: on_device(store.get("model.embed_tokens.weight")?)?,
            embed_positions: on_device(store.get("model.embed_positions.weight")?)?,
            input_ln,
            post_ln,
            final_norm: on_device(store.get("model.norm.weight")?)?,
            lm_head: on_device(store.get(lm_head_name)?)?,
        };

        let mut ranks = Vec::with_capacity(n);
        for plan in &plans {
            let mut layers = Vec::with_capacity(config.num_hidden_layers);
            for layer in 0..config.num_hidden_layers {
                let attn = format!("model.layers.{}.self_attn", layer);
                let mlp = format!("model.layers.{}.mlp", layer);
                layers.push(RankLayer {
                    q: shard_column(store.get(&format!("{}.q_proj.weight", attn))?, plan, &device)?,
                    k: shard_column(store.get(&format!("{}.k_proj.weight", attn))?, plan, &device)?,
                    v: shard_column(store.get(&format!("{}.v_proj.weight", attn))?, plan, &device)?,
                    o: shard_row(store.get(&format!("{}.o_proj.weight", attn))?, plan, &device)?,
                    gate: shard_column(
                        store.get(&format!("{}.gate_proj.weight", mlp))?,
                        plan,
                        &device,
                    )?,
                    up: shard_column(store.get(&format!("{}.up_proj.weight", mlp))?, plan, &device)?,
                    down: shard_row(store.get(&format!("{}.down_proj.weight", mlp))?, plan, &device)?,
                });
            }

            let (embed, lm_head) = if opts.parallelize_embeddings {
                let embed = VocabShard::new(store.get("model.embed_tokens.weight")?, plan, &device)?;
                let lm_head = shard_column(store.get(lm_head_name)?, plan, &device)?;
                (Some(embed), Some(lm_head))
            } else {
                (None, None)
            };

            ranks.push(RankShard {
                layers,
                embed,
                lm_head,
            });
        }

        debug!(
            shard_count = n,
            layers = config.num_hidden_layers,
            "sharded model constructed"
        );

        Ok(Self {
            config,
            group,
            ranks,
            replicated,
            parallel_embeddings: opts.parallelize_embeddings,
            sequence_parallel: opts.sequence_parallel,
            device,
        })
    }

    fn attention_bias(&self, seq: usize, attention_mask: &Tensor) -> Result<Tensor> {
        let mut data = vec![0f32; seq * seq];
        for i in 0..seq {
            for j in (i + 1)..seq {
                data[i * seq + j] = MASK_VALUE;
            }
        }
        let causal = Tensor::from_vec(data, (1, 1, seq, seq), &self.device).map_err(err)?;

        let pad = attention_mask
            .to_dtype(candle_core::DType::F32)
            .and_then(|t| t.reshape((1, 1, 1, seq)))
            .map_err(err)?;
        let pad_bias = ((pad - 1.0).map_err(err)? * f64::from(-MASK_VALUE)).map_err(err)?;
        causal.broadcast_add(&pad_bias).map_err(err)
    }

    fn attend(
        &self,
        layer: &RankLayer,
        normed: &Tensor,
        bias: &Tensor,
        seq: usize,
        local_heads: usize,
        head_dim: usize,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let split = |t: Tensor| -> Result<Tensor> {
            t.reshape((1, seq, local_heads, head_dim))
                .and_then(|t| t.transpose(1, 2))
                .and_then(|t| t.contiguous())
                .map_err(err)
        };

        let q = split(linear(normed, &layer.q)?)?;
        let k = split(linear(normed, &layer.k)?)?;
        let v = split(linear(normed, &layer.v)?)?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.transpose(2, 3).and_then(|t| t.contiguous()).map_err(err)?)
            .map_err(err)?;
        let scores = (scores * scale)
            .and_then(|t| t.broadcast_add(bias))
            .map_err(err)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores).map_err(err)?;

        let context = probs
            .matmul(&v)
            .and_then(|t| t.transpose(1, 2))
            .and_then(|t| t.contiguous())
            .and_then(|t| t.reshape((1, seq, local_heads * head_dim)))
            .map_err(err)?;
        let partial = linear(&context, &layer.o)?;

        Ok((partial, k, v))
    }

    fn embed(&self, ids: &Tensor, seq: usize) -> Result<Tensor> {
        let tokens = if self.parallel_embeddings {
            let partials = self
                .ranks
                .iter()
                .map(|rank| {
                    rank.embed
                        .as_ref()
                        .ok_or_else(|| ParigateError::internal("missing embedding shard"))?
                        .lookup(ids)
                })
                .collect::<Result<Vec<_>>>()?;
            self.group.all_reduce_sum(&partials)?
        } else {
            embed_lookup(&self.replicated.embed_tokens, ids)?
        };

        let positions = self
            .replicated
            .embed_positions
            .narrow(0, 0, seq)
            .and_then(|t| t.unsqueeze(0))
            .map_err(err)?;
        tokens.broadcast_add(&positions).map_err(err)
    }
}

impl ShardedForward for ShardedNanoLlama {
    fn world_size(&self) -> usize {
        self.group.world_size()
    }

    fn forward(
        &self,
        inputs: &ProbeInput,
        labels: Option<&Tensor>,
        preserve_logits: bool,
    ) -> Result<Vec<ModelOutputs>> {
        let n = self.group.world_size();
        let ids = inputs.get("input_ids")?;
        let attention_mask = inputs.get("attention_mask")?;
        let seq = ids.dim(1).map_err(err)?;

        if seq > self.config.max_position_embeddings {
            return Err(ParigateError::shape_mismatch(format!(
                "sequence length {} exceeds max position embeddings {}",
                seq, self.config.max_position_embeddings
            )));
        }
        if self.sequence_parallel && seq % n != 0 {
            return Err(ParigateError::shape_mismatch(format!(
                "sequence length {} not divisible by shard count {}",
                seq, n
            )));
        }

        let local_heads = self.config.num_attention_heads / n;
        let head_dim = self.config.head_dim();
        let bias = self.attention_bias(seq, attention_mask)?;

        let mut hidden = self.embed(ids, seq)?;
        // Per layer, per rank: (k, v) with this rank's heads.
        let mut cached_kv: Vec<Vec<(Tensor, Tensor)>> = Vec::new();

        for layer_idx in 0..self.config.num_hidden_layers {
            let normed = rms_norm(
                &hidden,
                &self.replicated.input_ln[layer_idx],
                self.config.rms_norm_eps,
            )?;

            let mut o_partials = Vec::with_capacity(n);
            let mut layer_kv = Vec::with_capacity(n);
            for rank in &self.ranks {
                let (partial, k, v) = self.attend(
                    &rank.layers[layer_idx],
                    &normed,
                    &bias,
                    seq,
                    local_heads,
                    head_dim,
                )?;
                o_partials.push(partial);
                layer_kv.push((k, v));
            }
            let attn_out = self.group.all_reduce_sum(&o_partials)?;
            hidden = (&hidden + &attn_out).map_err(err)?;
            cached_kv.push(layer_kv);

            let normed = rms_norm(
                &hidden,
                &self.replicated.post_ln[layer_idx],
                self.config.rms_norm_eps,
            )?;
            let mut mlp_partials = Vec::with_capacity(n);
            for rank in &self.ranks {
                let layer = &rank.layers[layer_idx];
                let gate = candle_nn::ops::silu(&linear(&normed, &layer.gate)?).map_err(err)?;
                let up = linear(&normed, &layer.up)?;
                let activated = (&gate * &up).map_err(err)?;
                mlp_partials.push(linear(&activated, &layer.down)?);
            }
            let mlp_out = self.group.all_reduce_sum(&mlp_partials)?;
            hidden = (&hidden + &mlp_out).map_err(err)?;
        }

        hidden = rms_norm(&hidden, &self.replicated.final_norm, self.config.rms_norm_eps)?;

        let logits_per_rank: Vec<Tensor> = if self.parallel_embeddings {
            self.ranks
                .iter()
                .map(|rank| {
                    let head = rank
                        .lm_head
                        .as_ref()
                        .ok_or_else(|| ParigateError::internal("missing lm head shard"))?;
                    linear(&hidden, head)
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let full = linear(&hidden, &self.replicated.lm_head)?;
            vec![full; n]
        };

        // Loss is reduced across the full vocabulary, so every rank reports
        // the same scalar.
        let loss = match labels {
            Some(labels) => {
                let full_logits = if self.parallel_embeddings {
                    let last = logits_per_rank[0].rank() - 1;
                    self.group.all_gather(&logits_per_rank, last)?
                } else {
                    logits_per_rank[0].clone()
                };
                Some(masked_causal_loss(
                    &full_logits,
                    labels,
                    attention_mask,
                    preserve_logits,
                )?)
            }
            None => None,
        };

        let mut outputs = Vec::with_capacity(n);
        for (rank_idx, logits) in logits_per_rank.into_iter().enumerate() {
            let mut out = ModelOutputs::new();
            out.push(
                LOSS_FIELD,
                loss.as_ref()
                    .map(|t| OutputValue::Tensor(t.clone()))
                    .unwrap_or(OutputValue::Absent),
            );
            out.push("logits", OutputValue::Tensor(logits));

            let past = cached_kv
                .iter()
                .map(|layer_kv| {
                    let (k, v) = &layer_kv[rank_idx];
                    OutputValue::Sequence(vec![
                        OutputValue::Tensor(k.clone()),
                        OutputValue::Tensor(v.clone()),
                    ])
                })
                .collect();
            out.push("past_key_values", OutputValue::Sequence(past));

            let states = if self.sequence_parallel && n > 1 {
                let slice = seq / n;
                hidden
                    .narrow(1, rank_idx * slice, slice)
                    .and_then(|t| t.contiguous())
                    .map_err(err)?
            } else {
                hidden.clone()
            };
            out.push("hidden_states", OutputValue::Tensor(states));

            outputs.push(out);
        }

        Ok(outputs)
    }
}

//! Deterministic loader
//!
//! Instantiates a model under a reproducible seed, either from a
//! configuration alone (random weights) or from a pretrained directory
//! holding `config.json`, `tokenizer.json` and `model.safetensors`.

use crate::config::ModelConfig;
use crate::lazy::LazyScope;
use crate::model::ModelHandle;
use crate::tokenizer::{ByteFallbackTokenizer, HfTokenizer, TextTokenizer};
use crate::weights::WeightStore;
use candle_core::Device as CandleDevice;
use parigate_types::{Device, ParigateError, Result, RunConfig};
use std::path::Path;
use tracing::{debug, info};

/// Architecture identifier the loader can materialize
pub const NANOLLAMA: &str = "nanollama";

/// Map a run device onto the tensor backend
pub fn to_candle_device(device: &Device) -> Result<CandleDevice> {
    match device {
        Device::Cpu => Ok(CandleDevice::Cpu),
        Device::Cuda(idx) => CandleDevice::new_cuda(*idx)
            .map_err(|e| ParigateError::backend(format!("cuda:{} init failed: {}", idx, e))),
        Device::Metal => CandleDevice::new_metal(0)
            .map_err(|e| ParigateError::backend(format!("metal init failed: {}", e))),
    }
}

/// Instantiate a model for one run.
///
/// The global random state is reset from the run seed before any weight
/// materialization: two loads with the same seed and the same `from_config`
/// value produce bit-identical initial weights.
pub fn load(run: &RunConfig) -> Result<ModelHandle> {
    run.validate()?;
    let device = to_candle_device(&run.device)?;

    let mut config = resolve_config(run)?;
    config.apply_overrides(&run.overrides)?;
    config.ensure_problem_type();
    config.validate()?;

    if config.architecture != NANOLLAMA {
        return Err(ParigateError::model_instantiation(format!(
            "cannot materialize architecture `{}`",
            config.architecture
        )));
    }

    info!(
        architecture = %config.architecture,
        from_config = run.flags.from_config,
        lazy = run.flags.lazy_load,
        seed = run.seed,
        "loading model"
    );

    let lazy = !run.flags.from_config && run.flags.lazy_load;

    let (weights, tokenizer) = if run.flags.from_config {
        let weights = WeightStore::init_nanollama(&config, run.seed)?;
        let tokenizer: Box<dyn TextTokenizer> =
            Box::new(ByteFallbackTokenizer::new(config.vocab_size)?);
        (weights, tokenizer)
    } else {
        let source = run
            .pretrained_source
            .as_deref()
            .ok_or_else(|| ParigateError::model_instantiation("no pretrained source given"))?;
        let weights = if lazy {
            let _scope = LazyScope::enter(run.shard_count);
            load_pretrained_weights(source)?
        } else {
            load_pretrained_weights(source)?
        };
        let tokenizer: Box<dyn TextTokenizer> = Box::new(HfTokenizer::from_file(
            &source.join("tokenizer.json"),
            config.pad_token_id,
        )?);
        (weights, tokenizer)
    };

    let mut handle = ModelHandle {
        config,
        weights,
        tokenizer,
        device,
    };

    if lazy {
        // Weights stay host-resident; the sharding step places per-rank
        // slices so the device never holds a full replica per shard.
        debug!("lazy load: deferring device placement to sharding");
    } else {
        handle.weights.place(&handle.device)?;
    }

    Ok(handle)
}

fn resolve_config(run: &RunConfig) -> Result<ModelConfig> {
    if run.flags.from_config {
        return Ok(ModelConfig {
            architecture: run.architecture.clone(),
            ..Default::default()
        });
    }
    let source = run
        .pretrained_source
        .as_deref()
        .ok_or_else(|| ParigateError::model_instantiation("no pretrained source given"))?;
    read_config_json(source)
}

fn read_config_json(source: &Path) -> Result<ModelConfig> {
    let path = source.join("config.json");
    let content = std::fs::read_to_string(&path).map_err(|e| {
        ParigateError::model_instantiation(format!("read {} failed: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ParigateError::model_instantiation(format!("parse {} failed: {}", path.display(), e))
    })
}

fn load_pretrained_weights(source: &Path) -> Result<WeightStore> {
    let path = source.join("model.safetensors");
    if !path.exists() {
        return Err(ParigateError::model_instantiation(format!(
            "weights file not found: {}",
            path.display()
        )));
    }
    WeightStore::load_safetensors(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parigate_types::{ConfigOverride, RunFlags};
    use std::path::PathBuf;

    fn config_only_run(seed: u64) -> RunConfig {
        RunConfig {
            architecture: NANOLLAMA.to_string(),
            pretrained_source: None,
            shard_count: 1,
            flags: RunFlags {
                from_config: true,
                ..Default::default()
            },
            overrides: Vec::new(),
            seed,
            run_id: "loader-test".to_string(),
            output_dir: PathBuf::from("/tmp"),
            device: Device::Cpu,
        }
    }

    #[test]
    fn config_only_loads_are_deterministic() {
        let a = load(&config_only_run(42)).unwrap();
        let b = load(&config_only_run(42)).unwrap();
        let a_host = a.weights.to_host_vecs().unwrap();
        let b_host = b.weights.to_host_vecs().unwrap();
        for ((name, data_a), (_, data_b)) in a_host.iter().zip(&b_host) {
            let bits_a: Vec<u32> = data_a.iter().map(|f| f.to_bits()).collect();
            let bits_b: Vec<u32> = data_b.iter().map(|f| f.to_bits()).collect();
            assert_eq!(bits_a, bits_b, "weight `{}` differs across loads", name);
        }
    }

    #[test]
    fn problem_type_is_defaulted() {
        let handle = load(&config_only_run(1)).unwrap();
        assert_eq!(handle.config.problem_type.as_deref(), Some("causal_lm"));
    }

    #[test]
    fn overrides_are_applied_before_materialization() {
        let mut run = config_only_run(1);
        run.overrides = vec![ConfigOverride::new("num_hidden_layers", "1")];
        let handle = load(&run).unwrap();
        assert_eq!(handle.config.num_hidden_layers, 1);
        assert!(!handle.weights.contains("model.layers.1.input_layernorm.weight"));
    }

    #[test]
    fn unknown_architecture_is_fatal() {
        let mut run = config_only_run(1);
        run.architecture = "gptX".to_string();
        let err = load(&run).unwrap_err();
        assert!(matches!(
            err,
            ParigateError::ModelInstantiation { .. }
        ));
    }

    #[test]
    fn missing_pretrained_source_is_fatal() {
        let mut run = config_only_run(1);
        run.flags.from_config = false;
        run.pretrained_source = Some(PathBuf::from("/nonexistent/model"));
        assert!(load(&run).is_err());
    }

    #[test]
    fn pretrained_directory_without_weights_is_fatal_after_config_parse() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"model_type": "nanollama", "vocab_size": 128}"#,
        )
        .unwrap();

        let mut run = config_only_run(1);
        run.flags.from_config = false;
        run.pretrained_source = Some(dir.path().to_path_buf());

        // The config parses, then weight resolution fails.
        let err = load(&run).unwrap_err();
        assert!(matches!(err, ParigateError::ModelInstantiation { .. }));
        assert!(err.to_string().contains("model.safetensors"));
    }

    #[test]
    fn forward_spec_declares_decoder_inputs_only_for_encoder_decoder() {
        let handle = load(&config_only_run(1)).unwrap();
        let spec = handle.forward_spec();
        assert!(spec.accepts("input_ids"));
        assert!(spec.accepts("attention_mask"));
        assert!(!spec.is_encoder_decoder);
        assert!(!spec.accepts("decoder_input_ids"));
    }
}

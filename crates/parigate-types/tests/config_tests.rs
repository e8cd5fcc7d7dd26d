//! Tests for run configuration and the environment contract

use parigate_types::{
    parse_bool, parse_overrides, ConfigOverride, Device, EnvContract, RunConfig, RunFlags,
};
use std::collections::HashMap;
use std::path::PathBuf;

fn base_run(shard_count: usize) -> RunConfig {
    RunConfig {
        architecture: "nanollama".to_string(),
        pretrained_source: None,
        shard_count,
        flags: RunFlags {
            from_config: true,
            parallelize_embeddings: true,
            sequence_parallel: true,
            ..Default::default()
        },
        overrides: Vec::new(),
        seed: 42,
        run_id: "test-run".to_string(),
        output_dir: PathBuf::from("/tmp/out"),
        device: Device::Cpu,
    }
}

#[test]
fn parallel_flags_are_inert_on_baseline() {
    let run = base_run(1);
    assert!(!run.is_parallel());
    assert!(!run.parallelize_embeddings());
    assert!(!run.sequence_parallel());
    assert_eq!(run.artifact_name(), "original.bin");

    let run = base_run(4);
    assert!(run.is_parallel());
    assert!(run.parallelize_embeddings());
    assert!(run.sequence_parallel());
    assert_eq!(run.artifact_name(), "parallel.bin");
}

#[test]
fn validate_rejects_zero_shards() {
    let run = base_run(0);
    assert!(run.validate().is_err());
}

#[test]
fn validate_requires_source_for_pretrained_runs() {
    let mut run = base_run(1);
    run.flags.from_config = false;
    assert!(run.validate().is_err());

    run.pretrained_source = Some(PathBuf::from("/models/nanollama"));
    assert!(run.validate().is_ok());
}

#[test]
fn bool_strings_are_tolerant() {
    for s in ["true", "TRUE", "1", "yes"] {
        assert!(parse_bool(s).unwrap(), "{}", s);
    }
    for s in ["false", "0", "No", " false "] {
        assert!(!parse_bool(s).unwrap(), "{}", s);
    }
    assert!(parse_bool("maybe").is_err());
    assert!(parse_bool("").is_err());
}

#[test]
fn override_parsing() {
    let parsed = parse_overrides("num_hidden_layers=2, vocab_size=512").unwrap();
    assert_eq!(
        parsed,
        vec![
            ConfigOverride::new("num_hidden_layers", "2"),
            ConfigOverride::new("vocab_size", "512"),
        ]
    );

    // Trailing separators are ignored, malformed entries are not
    assert_eq!(parse_overrides("a=1,").unwrap().len(), 1);
    assert!(parse_overrides("not-an-override").is_err());
    assert!(parse_overrides("=3").is_err());
}

#[test]
fn env_contract_from_lookup() {
    let mut env = HashMap::new();
    env.insert("from_config", "true");
    env.insert("lazy_load", "false");
    env.insert("is_parallel", "1");
    env.insert("config_overwrite", "vocab_size=512");
    env.insert("parallelize_embeddings", "yes");
    env.insert("sequence_parallel_enabled", "no");
    env.insert("computing_loss_is_supported", "true");

    let contract =
        EnvContract::from_lookup(|name| env.get(name).map(|v| v.to_string())).unwrap();
    assert!(contract.from_config);
    assert!(!contract.lazy_load);
    assert!(contract.is_parallel);
    assert_eq!(contract.config_overwrite.len(), 1);
    assert!(contract.run_id.is_none());

    let flags = contract.flags();
    assert!(flags.parallelize_embeddings);
    assert!(!flags.sequence_parallel);
    assert!(flags.loss_supported);
}

#[test]
fn env_contract_missing_variable_is_an_error() {
    let err = EnvContract::from_lookup(|_| None).unwrap_err();
    assert!(err.to_string().contains("from_config"));
}

//! parigate CLI
//!
//! The enclosing trigger invokes this binary twice per verification, once
//! with `is_parallel=false` for the baseline and once with
//! `is_parallel=true` for the sharded run, then diffs the two artifacts.
//! Feature selection arrives through environment variables; everything
//! else is a flag.

use clap::Parser;
use colored::Colorize;
use parigate_harness::VerificationPipeline;
use parigate_types::{Device, EnvContract, ParigateError, Result, RunConfig};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "parigate")]
#[command(about = "Parity gate for tensor/sequence-parallel model transformations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Directory the output artifact is written to
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Model architecture identifier
    #[arg(long, default_value = "nanollama")]
    architecture: String,

    /// Pretrained source directory (config.json / tokenizer.json /
    /// model.safetensors); required unless from_config is set
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Shard count used when is_parallel is set
    #[arg(long, default_value_t = 2)]
    shard_count: usize,

    /// Random seed for weight materialization
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Compute device (cpu, cuda:N, metal)
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_run(cli: &Cli, contract: &EnvContract) -> Result<RunConfig> {
    let shard_count = if contract.is_parallel {
        if cli.shard_count < 2 {
            return Err(ParigateError::config(
                "is_parallel requires a shard count of at least 2",
            ));
        }
        cli.shard_count
    } else {
        1
    };

    let run = RunConfig {
        architecture: cli.architecture.clone(),
        pretrained_source: cli.pretrained.clone(),
        shard_count,
        flags: contract.flags(),
        overrides: contract.config_overwrite.clone(),
        seed: cli.seed,
        run_id: contract
            .run_id
            .clone()
            .unwrap_or_else(|| "parigate".to_string()),
        output_dir: cli.output_dir.clone(),
        device: Device::from_str(&cli.device)?,
    };
    run.validate()?;
    Ok(run)
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = EnvContract::from_env()
        .and_then(|contract| build_run(&cli, &contract))
        .and_then(|run| VerificationPipeline::new(run)?.execute());

    match result {
        Ok(path) => {
            println!("artifact written to {}", path.display());
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

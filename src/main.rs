use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::{debug, warn};

use modelcheck::config::{CliOverrides, Preset, RunConfig, Settings};
use modelcheck::error::exit_code;
use modelcheck::harness::{Harness, Reporter};
use modelcheck::probe::SystemProbe;
use modelcheck::providers::DefaultConnector;

#[derive(Parser)]
#[command(name = "modelcheck")]
#[command(about = "Load a causal LM checkpoint and run one test generation")]
#[command(version)]
struct Args {
    #[arg(long, help = "Model identifier to load (default: $MODEL_ID, then the preset's model)")]
    model: Option<String>,

    #[arg(long, help = "Print a simulated response without probing or loading anything")]
    simulate: bool,

    #[arg(long = "no-quant", help = "Do not use 4-bit quantization even if supported")]
    no_quant: bool,

    #[arg(long, value_enum, help = "Bundle of defaults: full (7B, 4-bit) or quick (small model)")]
    preset: Option<Preset>,

    #[arg(long, help = "Upper bound on generated tokens")]
    max_new_tokens: Option<usize>,

    #[arg(long, help = "Accept checkpoints that declare custom model code")]
    trust_remote_code: bool,

    #[arg(long, help = "Fall back to the simulated response when dependencies are missing")]
    auto_simulate: bool,

    #[arg(long, help = "Checkpoint revision (branch, tag or commit)")]
    revision: Option<String>,

    #[arg(long, help = "Repository to take pre-quantized 4-bit GGUF weights from")]
    gguf_model: Option<String>,

    #[arg(long, help = "Settings file (default: ./modelcheck.toml)")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            model: self.model.clone(),
            simulate: self.simulate,
            no_quant: self.no_quant,
            preset: self.preset,
            max_new_tokens: self.max_new_tokens,
            trust_remote_code: self.trust_remote_code,
            auto_simulate: self.auto_simulate,
            revision: self.revision.clone(),
            gguf_model: self.gguf_model.clone(),
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() {
    // .env may supply MODEL_ID and HF_TOKEN
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_code::SUCCESS,
                _ => exit_code::USAGE,
            };
            if let Err(print_err) = e.print() {
                debug!("Could not print usage: {}", print_err);
            }
            process::exit(code);
        }
    };

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("Failed to set up logging: {}", e);
    }
    if dotenv_loaded {
        debug!("Loaded environment from .env");
    }

    let config = match Settings::load(args.config.as_deref())
        .and_then(|settings| RunConfig::from_env(&args.overrides(), &settings))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            process::exit(exit_code::CONFIG);
        }
    };

    if config.simulate && (args.no_quant || args.trust_remote_code) {
        warn!("--simulate ignores loading flags");
    }

    let harness = Harness::new(&SystemProbe, &DefaultConnector);
    let outcome = harness.run(&config, &mut Reporter::stdio());
    process::exit(outcome.exit_code);
}

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use nestql::config::CONFIG_FILE_NAME;
use nestql::{Config, Request};
use nestql_core::{CancellationToken, EvalError, TypingMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nestql")]
#[command(about = "nestql - evaluate a query tree against nested JSON data", long_about = None)]
struct Args {
    /// Serialized query tree (JSON)
    #[arg(short, long)]
    query: PathBuf,

    /// JSON object whose top-level fields become global bindings
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Positional parameter as JSON, bound in order (e.g., --param 42 --param '"x"')
    #[arg(long = "param")]
    params: Vec<String>,

    /// Directory containing nestql.toml and .env
    #[arg(long, default_value = ".")]
    config: PathBuf,

    /// Override the configured typing mode
    #[arg(long, value_enum)]
    typing_mode: Option<TypingModeArg>,

    /// Write the effective configuration (overrides included) to nestql.toml in the config directory
    #[arg(long)]
    save_config: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TypingModeArg {
    Legacy,
    Permissive,
}

impl From<TypingModeArg> for TypingMode {
    fn from(arg: TypingModeArg) -> Self {
        match arg {
            TypingModeArg::Legacy => TypingMode::Legacy,
            TypingModeArg::Permissive => TypingMode::Permissive,
        }
    }
}

/// Load the configuration, apply command-line overrides and persist it when asked.
fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load(&args.config)?;
    if let Some(mode) = args.typing_mode {
        config.compile.typing_mode = mode.into();
    }
    if args.save_config {
        config
            .save(&args.config)
            .with_context(|| format!("cannot write configuration to {}", args.config.display()))?;
    }
    Ok(config)
}

fn execute(args: Args) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.save_config {
        tracing::info!("saved configuration to {}", args.config.join(CONFIG_FILE_NAME).display());
    }

    let query = std::fs::read_to_string(&args.query)
        .with_context(|| format!("cannot read {}", args.query.display()))?;
    let data = match &args.data {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?,
        ),
        None => None,
    };

    let request = Request::from_json(&query, data.as_deref(), &args.params)?;
    tracing::debug!(typing_mode = ?config.compile.typing_mode, "evaluating {}", args.query.display());

    let result = nestql::run(config.compile_options(), request, CancellationToken::new())?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    match execute(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<EvalError>() {
            Some(eval) => {
                eprintln!("error[{:?}]: {}", eval.code(), eval);
                if eval.is_interrupted() {
                    ExitCode::from(2)
                } else {
                    ExitCode::FAILURE
                }
            }
            None => {
                eprintln!("error: {:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}

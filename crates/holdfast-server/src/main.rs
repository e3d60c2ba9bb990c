//! holdfastd entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use holdfast_core::{TracingConfig, init_tracing};
use holdfast_server::OrchestratorConfig;

/// holdfastd - multi-calendar availability and provisional hold daemon
#[derive(Debug, Parser)]
#[command(name = "holdfastd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "HOLDFAST_CONFIG", default_value = "holdfast.toml")]
    config: PathBuf,

    /// Enable debug output
    #[arg(long, short = 'v')]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match OrchestratorConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tracing_config = if cli.debug {
        Ok(TracingConfig::cli_debug())
    } else {
        config.logging.to_tracing_config()
    };
    let initialized = match tracing_config {
        Ok(tracing_config) => init_tracing(tracing_config).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = initialized {
        eprintln!("error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match holdfast_server::daemon::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

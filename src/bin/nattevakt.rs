//! Nattevakt CLI Binary
//!
//! Command-line front-end for the night-watch news pipeline.

use anyhow::Context;
use clap::Parser;
use nattevakt::cli::{map_error, Cli, RunContext};
use nattevakt::config::ConfigLoader;
use nattevakt::error::PipelineError;
use nattevakt::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            let message = e
                .downcast_ref::<PipelineError>()
                .map(map_error)
                .unwrap_or_else(|| format!("{:#}", e));
            eprintln!("{}", message);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let logging_config = build_logging_config(cli);
    init_logging(Some(&logging_config)).context("Failed to initialize logging")?;
    info!("Nattevakt CLI starting");

    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())?;
    Ok(context.execute(&cli.command)?)
}

/// Build logging configuration from CLI args and the config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = if let Some(ref config_path) = cli.config {
        ConfigLoader::load_from_file(config_path)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    } else {
        ConfigLoader::load(&cli.workspace)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    };

    if cli.quiet {
        config.enabled = false;
    }
    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = Some(file.clone());
    } else if config.output == "file" {
        if let Some(ref file) = config.file {
            if file.is_relative() {
                config.file = Some(cli.workspace.join(file));
            }
        }
    }

    config
}

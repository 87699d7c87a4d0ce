//! `stagectl` - command line control of motorized stages
//!
//! Stages are described in a TOML file (see `stage_hardware::config`).
//!
//! # Usage
//!
//! ```bash
//! stagectl drivers
//! stagectl --config stages.toml stages
//! stagectl --config stages.toml position xyz
//! stagectl --config stages.toml move xyz 100 200 0
//! stagectl --config stages.toml home focus --wait
//! RUST_LOG=stage_driver_newport=trace stagectl status
//! ```
//!
//! Ctrl-C cancels a running wait.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use stage_core::capabilities::Stage;
use stage_core::motion::{CancelToken, WaitOptions};
use stage_core::Vector;
use stage_hardware::{load_hardware_config, HardwareConfig, StageRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "stagectl")]
#[command(about = "Control motorized positioning stages", long_about = None)]
struct Cli {
    /// Hardware configuration file (TOML format)
    #[arg(long, short, default_value = "stages.toml", global = true)]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the drivers compiled into this build
    Drivers,

    /// Build every configured stage and list them
    Stages,

    /// Print the current position of a stage
    Position {
        /// Stage id
        stage: String,
    },

    /// Move a stage to an absolute position
    Move {
        /// Stage id
        stage: String,
        /// Target, one value per axis
        #[arg(required = true, allow_negative_numbers = true)]
        target: Vec<f64>,
        /// Return as soon as the move is sent
        #[arg(long)]
        no_wait: bool,
        /// Override the configured wait timeout (milliseconds, 0 = forever)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run the homing sequence
    Home {
        /// Stage id
        stage: String,
        /// Wait for homing to finish
        #[arg(long)]
        wait: bool,
        /// Override the configured wait timeout (milliseconds, 0 = forever)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print position and motion state of one or every stage
    Status {
        /// Stage id (all stages when omitted)
        stage: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let (json, plain) = match format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let registry = StageRegistry::with_builtin_factories();

    if let Commands::Drivers = cli.command {
        for factory in registry.list_factories() {
            let capabilities: Vec<&str> = factory.capabilities.iter().map(|c| c.name()).collect();
            println!(
                "{:<8} {:<40} {}",
                factory.driver_type,
                factory.name,
                capabilities.join(", ")
            );
        }
        return Ok(());
    }

    let config = load_hardware_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling wait");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Drivers => Ok(()),
        Commands::Stages => list_stages(&registry, &config).await,
        Commands::Position { stage } => {
            let stage = open_stage(&registry, &config, &stage).await?;
            println!("{}", stage.position().await?);
            Ok(())
        }
        Commands::Move {
            stage,
            target,
            no_wait,
            timeout_ms,
        } => {
            let handle = open_stage(&registry, &config, &stage).await?;
            let opts = wait_options(&config, timeout_ms, &cancel);
            let target = Vector::from(target);
            handle
                .move_to(&target, (!no_wait).then_some(&opts))
                .await
                .with_context(|| format!("Move of '{stage}' to {target} failed"))?;
            println!("{}", handle.position().await?);
            Ok(())
        }
        Commands::Home {
            stage,
            wait,
            timeout_ms,
        } => {
            let handle = open_stage(&registry, &config, &stage).await?;
            let opts = wait_options(&config, timeout_ms, &cancel);
            handle
                .home(wait.then_some(&opts))
                .await
                .with_context(|| format!("Homing of '{stage}' failed"))?;
            if wait {
                println!("{}", handle.position().await?);
            }
            Ok(())
        }
        Commands::Status { stage: Some(id) } => {
            let stage = open_stage(&registry, &config, &id).await?;
            print_status(&id, stage.as_ref()).await
        }
        Commands::Status { stage: None } => {
            registry.register_from_config(&config).await?;
            report_failures(&registry);
            for info in registry.list_stages() {
                if let Some(stage) = registry.get(&info.id) {
                    print_status(&info.id, stage.as_ref()).await?;
                }
            }
            Ok(())
        }
    }
}

fn wait_options(config: &HardwareConfig, timeout_ms: Option<u64>, cancel: &CancelToken) -> WaitOptions {
    let opts = config.motion.wait_options().with_cancel(cancel.clone());
    match timeout_ms {
        Some(0) => opts.with_timeout(None),
        Some(ms) => opts.with_timeout(Some(Duration::from_millis(ms))),
        None => opts,
    }
}

/// Build only the requested stage so other devices stay untouched.
async fn open_stage(
    registry: &StageRegistry,
    config: &HardwareConfig,
    id: &str,
) -> Result<Arc<dyn Stage>> {
    let entry = config.stage(id).with_context(|| {
        let known: Vec<&str> = config.stages.iter().map(|s| s.id.as_str()).collect();
        format!("No stage '{id}' in configuration (known: {known:?})")
    })?;
    registry.register_stage(entry).await?;
    registry
        .get(id)
        .with_context(|| format!("Stage '{id}' was not registered"))
}

async fn list_stages(registry: &StageRegistry, config: &HardwareConfig) -> Result<()> {
    registry.register_from_config(config).await?;
    for info in registry.list_stages() {
        println!(
            "{:<12} {:<8} {} axis  {:<6} {}",
            info.id,
            info.driver_type,
            info.num_axis,
            info.metadata.position_units.as_deref().unwrap_or("-"),
            info.metadata
                .identification
                .as_deref()
                .unwrap_or(info.name.as_str()),
        );
    }
    report_failures(registry);
    Ok(())
}

fn report_failures(registry: &StageRegistry) {
    for failure in registry.list_registration_failures() {
        eprintln!(
            "{} ({}): {}",
            failure.stage_id, failure.driver_type, failure.error
        );
    }
}

async fn print_status(id: &str, stage: &dyn Stage) -> Result<()> {
    let position = stage.position().await?;
    let state = stage.state().await?;
    println!("{id:<12} {state:<14} {position}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_accepts_negative_targets() {
        let cli = Cli::try_parse_from(["stagectl", "move", "xy", "-1.5", "2", "--no-wait"]).unwrap();
        match cli.command {
            Commands::Move {
                stage,
                target,
                no_wait,
                timeout_ms,
            } => {
                assert_eq!(stage, "xy");
                assert_eq!(target, vec![-1.5, 2.0]);
                assert!(no_wait);
                assert_eq!(timeout_ms, None);
            }
            _ => panic!("expected move"),
        }
        assert_eq!(cli.config, PathBuf::from("stages.toml"));
    }

    #[test]
    fn test_timeout_override() {
        let config = HardwareConfig::default();
        let cancel = CancelToken::new();
        assert_eq!(wait_options(&config, Some(0), &cancel).timeout, None);
        assert_eq!(
            wait_options(&config, Some(250), &cancel).timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            wait_options(&config, None, &cancel).timeout,
            config.motion.wait_options().timeout
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stagectl",
            "status",
            "--config",
            "lab.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("lab.toml"));
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.command, Commands::Status { stage: None }));
    }
}

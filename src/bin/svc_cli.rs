//! Command-line front end for the service controller.
//!
//! The binary ships with an empty plugin registry; deployments link
//! their plugins into [`build_registry`] and get config loading, start
//! planning, lifecycle commands, and signal-driven shutdown for free.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use svc_conductor::{config, Controller, PluginRegistry};

#[derive(Parser)]
#[command(name = "svc_cli", about = "Run plugin-based services from a config file")]
struct Cli {
    /// Path to the services config (JSON, or YAML by extension).
    #[arg(short, long, env = "SVC_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start all services and run until interrupted.
    Start,
    /// Start all services, run one job, then stop.
    Job {
        /// Service to run the job on.
        service: String,
        /// Arguments handed to the job.
        args: Vec<String>,
    },
    /// Start all services, purge the named ones, then stop.
    Purge {
        /// Services to purge.
        #[arg(required = true)]
        services: Vec<String>,
    },
    /// Print the computed start plan without starting anything.
    Plan {
        #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct PlanStage<'a> {
    stage: usize,
    services: Vec<&'a str>,
}

/// Registry of plugins available to this binary. Deployments register
/// their plugins here.
fn build_registry() -> PluginRegistry {
    PluginRegistry::new()
}

fn run(cli: Cli) -> Result<()> {
    let registry = build_registry();
    let config = config::load_file(&cli.config)?;
    let mut controller = Controller::new(&config, &registry)?;

    match cli.command {
        Command::Start => {
            controller.start()?;
            info!("services running, waiting for shutdown signal");
            wait_for_shutdown()?;
            controller.stop()?;
        }
        Command::Job { service, args } => {
            check_planned(&controller, std::slice::from_ref(&service))?;
            controller.start()?;
            let job = controller.job(&service, &args);
            let stop = controller.stop();
            job?;
            stop?;
        }
        Command::Purge { services } => {
            check_planned(&controller, &services)?;
            controller.start()?;
            let mut failed = false;
            for service in &services {
                match controller.purge(service) {
                    Ok(()) => println!("purged {service}"),
                    Err(e) => {
                        failed = true;
                        eprintln!("error: {e}");
                    }
                }
            }
            controller.stop()?;
            if failed {
                bail!("not all services were purged");
            }
        }
        Command::Plan { format } => print_plan(&controller, format)?,
    }
    Ok(())
}

/// Reject unknown service names before anything is started.
fn check_planned(controller: &Controller, services: &[String]) -> Result<()> {
    let planned = controller.planned_stages();
    for service in services {
        if !planned
            .iter()
            .any(|stage| stage.iter().any(|name| *name == service.as_str()))
        {
            bail!("no service named \"{service}\" in the config");
        }
    }
    Ok(())
}

fn print_plan(controller: &Controller, format: PlanFormat) -> Result<()> {
    let stages: Vec<PlanStage> = controller
        .planned_stages()
        .into_iter()
        .enumerate()
        .map(|(stage, services)| PlanStage { stage, services })
        .collect();
    match format {
        PlanFormat::Json => println!("{}", serde_json::to_string_pretty(&stages)?),
        PlanFormat::Text => {
            for stage in &stages {
                println!("stage {}: {}", stage.stage, stage.services.join(", "));
            }
        }
    }
    Ok(())
}

fn wait_for_shutdown() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        Ok::<(), anyhow::Error>(())
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

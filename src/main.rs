use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use bundlerwatch::config::Config;
use bundlerwatch::diagnose::diagnose;
use bundlerwatch::logging::init_tracing;
use bundlerwatch::resources::SystemProbe;
use bundlerwatch::Supervisor;

/// Supervise a bundler dev server until it is ready to accept connections.
#[derive(Parser, Debug)]
#[command(name = "bundlerwatch", version, about)]
struct Cli {
    /// Config file (default: ~/.config/bundlerwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the dev server and wait for it to become ready (default)
    Run(RunArgs),
    /// Check for common problems: busy port, missing packages, low resources
    Diagnose,
    /// Validate the config and print the effective values
    CheckConfig,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// First port to probe
    #[arg(long)]
    port_start: Option<u16>,

    /// Last port to probe
    #[arg(long)]
    port_end: Option<u16>,

    /// Seconds each attempt may take to become ready
    #[arg(long)]
    timeout: Option<u64>,

    /// Total number of launches allowed
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Dev-server command to run instead of the configured one
    #[arg(last = true)]
    command: Vec<String>,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(start) = self.port_start {
            config.ports.start = start;
            if self.port_end.is_none() && config.ports.end < start {
                config.ports.end = start;
            }
        }
        if let Some(end) = self.port_end {
            config.ports.end = end;
        }
        if let Some(timeout) = self.timeout {
            config.timeouts.attempt_timeout_seconds = timeout;
        }
        if let Some(max) = self.max_attempts {
            config.retry.max_attempts = max;
        }
        if let Some((program, args)) = self.command.split_first() {
            config.command.program = program.clone();
            config.command.args = args.to_vec();
        }
    }
}

fn load_config(cli: &Cli, run: &RunArgs) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    run.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = Cli::parse();
    let command = cli
        .command
        .take()
        .unwrap_or_else(|| Command::Run(RunArgs::default()));
    let default_args = RunArgs::default();
    let run_args = match &command {
        Command::Run(args) => args,
        _ => &default_args,
    };

    let config = match load_config(&cli, run_args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    init_tracing(&config.logging);

    let result = match command {
        Command::Run(_) => run(&config, cli.json).await,
        Command::Diagnose => run_diagnose(&config, cli.json).await,
        Command::CheckConfig => check_config(&config, cli.json),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, json: bool) -> anyhow::Result<bool> {
    let supervisor = Supervisor::from_config(config).await?;

    let report = supervisor.supervise().await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else if let Some(value) = report.result.ready_value() {
        println!("{}", value);
    } else {
        eprintln!("bundlerwatch: {}", report.result);
    }

    Ok(report.is_ready())
}

async fn run_diagnose(config: &Config, json: bool) -> anyhow::Result<bool> {
    let probe = SystemProbe::warmed(&config.resources.disk_path).await;
    let report = diagnose(config, &probe).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else if report.is_clean() {
        println!("No common issues found");
    } else {
        for issue in &report.issues {
            println!("- {}", issue.message);
        }
    }

    Ok(report.is_clean())
}

fn check_config(config: &Config, json: bool) -> anyhow::Result<bool> {
    let rendered = if json {
        serde_json::to_string_pretty(config).context("Failed to serialize config")?
    } else {
        toml::to_string_pretty(config).context("Failed to serialize config")?
    };
    println!("{}", rendered);
    Ok(true)
}

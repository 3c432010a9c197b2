use availability::{AvailabilityChecker, CheckerError, Resolution};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;

use config::{Config, ConfigError, LoggingConfig, MetricsConfig};

#[derive(Parser)]
#[command(name = "akayuki", about = "Check anime availability in the Akayuki catalog")]
struct Cli {
    /// Path to a YAML config file. Built-in defaults are used when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Resolve AniList ids and/or MAL ids and print their availability.
    Check {
        #[arg(long, num_args = 1..)]
        anilist: Vec<u64>,
        #[arg(long, num_args = 1..)]
        mal: Vec<u64>,
    },
    /// Load and validate the config, then exit.
    Validate,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checker(#[from] CheckerError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Error loading config from {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let _sentry = init_logging(config.common.logging.as_ref());

    if let Err(err) = run(cli.command, config) {
        tracing::error!(error = %err, "akayuki failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(command: CliCommand, config: Config) -> Result<(), CliError> {
    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    match command {
        CliCommand::Validate => {
            config.availability.validate().map_err(ConfigError::from)?;
            println!("config ok");
            Ok(())
        }
        CliCommand::Check { anilist, mal } => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(check(&config, anilist, mal))
        }
    }
}

async fn check(config: &Config, anilist: Vec<u64>, mal: Vec<u64>) -> Result<(), CliError> {
    let checker = AvailabilityChecker::from_config(&config.availability)?;
    tracing::info!(
        anilist = anilist.len(),
        mal = mal.len(),
        "checking availability"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Resolution>();
    for id in anilist {
        let tx = tx.clone();
        checker.submit_for_check(id, format!("AniList {id}"), move |resolution| {
            let _ = tx.send(resolution);
        });
    }
    for id in mal {
        let tx = tx.clone();
        checker.submit_secondary(id, format!("MAL {id}"), move |resolution| {
            let _ = tx.send(resolution);
        });
    }
    // Every waiter holds a sender until it fires, so the channel closes once
    // all of them have been delivered.
    drop(tx);

    while let Some(resolution) = rx.recv().await {
        println!("{}", format_resolution(&resolution, &checker.bot_url(&resolution)));
    }
    Ok(())
}

fn format_resolution(resolution: &Resolution, bot_url: &str) -> String {
    let id = |id: Option<u64>| id.map_or_else(|| "-".to_string(), |id| id.to_string());
    format!(
        "{:<24} anilist={:<8} mal={:<8} {:<16} {}",
        resolution.display_title,
        id(resolution.primary_id),
        id(resolution.secondary_id),
        resolution.status,
        bot_url
    )
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = metrics_exporter_statsd::StatsdBuilder::from(
        config.statsd_host.as_str(),
        config.statsd_port,
    )
    .build(Some(config.prefix.as_str()))
    .map_err(|e| CliError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|_| CliError::Metrics("a metrics recorder is already installed".into()))?;
    availability::metrics_defs::describe_all();
    Ok(())
}

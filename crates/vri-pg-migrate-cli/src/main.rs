//! vri-pg-migrate CLI - VRI academic data migration (MySQL + CSV to PostgreSQL).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vri_pg_migrate::catalog;
use vri_pg_migrate::error::EXIT_UNIT_ERROR;
use vri_pg_migrate::{
    Config, MemoryTarget, MigrateError, MigrationResult, Orchestrator, SourceSet,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "vri-pg-migrate")]
#[command(about = "Migrate legacy VRI academic data from MySQL and CSV into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply schema adjustments (bridging columns, relaxed constraints)
    Prepare,

    /// Truncate every destination table in reverse dependency order
    Clean,

    /// Prepare, clean and load every unit, or only the named units
    Run {
        /// Run only these units, in dependency order (no prepare or clean)
        #[arg(long = "unit", value_name = "NAME")]
        units: Vec<String>,

        /// Dry run: read and map every source, loading into memory only
        #[arg(long)]
        dry_run: bool,
    },

    /// Resume a previously interrupted migration
    Resume,

    /// List migration units in execution order
    List,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Prepare => {
            let mut orchestrator = Orchestrator::new(config).await?;
            orchestrator.prepare().await?;
            println!("Destination schema prepared");
        }

        Commands::Clean => {
            let mut orchestrator = connect(config, cli.state_file.clone()).await?;
            orchestrator.clean().await?;
            println!("Destination tables truncated");
        }

        Commands::Run { units, dry_run } => {
            let mut orchestrator = if dry_run {
                let sources = SourceSet::connect(&config).await?;
                let units_catalog = catalog::default_units(&config.migration);
                info!("Dry run: rows are loaded into memory only");
                Orchestrator::with_target(
                    config,
                    units_catalog,
                    Arc::new(MemoryTarget::new()),
                    Arc::new(sources),
                )?
            } else {
                connect(config, cli.state_file.clone()).await?
            };

            let result = tokio::select! {
                result = async {
                    if units.is_empty() {
                        orchestrator.run_all().await
                    } else {
                        orchestrator.run_units(&units).await
                    }
                } => result?,
                _ = shutdown_signal() => return Err(interrupted()),
            };
            return report(&result, cli.output_json, dry_run);
        }

        Commands::Resume => {
            // State file is required for resume
            let state_file = cli.state_file.ok_or_else(|| {
                MigrateError::Config("--state-file is required for resume".to_string())
            })?;

            let mut orchestrator = Orchestrator::new(config)
                .await?
                .with_state_file(state_file)
                .resume()?;
            info!("Resuming from previous state");

            let result = tokio::select! {
                result = orchestrator.run_all() => result?,
                _ = shutdown_signal() => return Err(interrupted()),
            };
            return report(&result, cli.output_json, false);
        }

        Commands::List => {
            // No connections needed to describe the catalog
            let units = catalog::default_units(&config.migration);
            let sources = SourceSet::offline(&config.migration.data_dir);
            let orchestrator = Orchestrator::with_target(
                config,
                units,
                Arc::new(MemoryTarget::new()),
                Arc::new(sources),
            )?;
            let plan = orchestrator.plan();

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                for (i, unit) in plan.iter().enumerate() {
                    println!("{:>3}. {} -> {}", i + 1, unit.name, unit.table);
                    println!("       source: {}", unit.source);
                    if !unit.depends_on.is_empty() {
                        println!("       after:  {}", unit.depends_on.join(", "));
                    }
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            orchestrator.health_check().await?;
            println!("All connections healthy");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn connect(config: Config, state_file: Option<PathBuf>) -> Result<Orchestrator, MigrateError> {
    let orchestrator = Orchestrator::new(config).await?;
    Ok(match state_file {
        Some(path) => orchestrator.with_state_file(path),
        None => orchestrator,
    })
}

fn report(result: &MigrationResult, json: bool, dry_run: bool) -> Result<ExitCode, MigrateError> {
    if json {
        println!("{}", result.to_json()?);
    } else {
        let status_msg = match (dry_run, result.is_success()) {
            (true, true) => "Dry run completed!",
            (false, true) => "Migration completed!",
            (_, false) => "Migration failed!",
        };
        println!("\n{}", status_msg);
        println!("  Run ID: {}", result.run_id);
        println!("  Duration: {:.2}s", result.duration_seconds);
        println!("{}", result.summary());
    }

    if result.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_UNIT_ERROR))
    }
}

fn interrupted() -> MigrateError {
    warn!("Interrupted; completed units are kept in the state file");
    MigrateError::State("interrupted by signal".to_string())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    // RUST_LOG wins over --verbosity
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() {
    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        // no handlers: never resolve
        return std::future::pending().await;
    };
    tokio::select! {
        _ = sigint.recv() => eprintln!("\nReceived SIGINT, stopping"),
        _ = sigterm.recv() => eprintln!("\nReceived SIGTERM, stopping"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    eprintln!("\nReceived Ctrl-C, stopping");
}

use std::sync::Arc;
use std::time::Duration;

use atjob_controller::{Controller, GarbageCollector, Reconciler, SystemClock};
use atjob_core::{AtjobConfig, Manifest, ObjectKey, Resource, ScheduledJob};
use atjob_runner::UnitRunner;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod stores;

use stores::Stores;

#[derive(Parser)]
#[command(name = "atjob")]
#[command(about = "Run commands once, at a scheduled time")]
struct Cli {
    /// Config file (default: $ATJOB_CONFIG, then ~/.atjob/atjob.toml)
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller, garbage collector and local runner until Ctrl-C
    Run {
        /// Apply this manifest before starting
        #[arg(long)]
        manifest: Option<String>,
    },
    /// Create the jobs in a TOML manifest; existing jobs are left alone
    Apply {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// List jobs and their phase
    Get,
    /// Delete a job (its execution unit is garbage-collected)
    Delete {
        /// NAMESPACE/NAME, or NAME in the default namespace
        job: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "atjob=info,atjob_controller=info,atjob_runner=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > ATJOB_CONFIG > ~/.atjob/atjob.toml
    let config_path = cli.config.or_else(|| std::env::var("ATJOB_CONFIG").ok());
    let config = AtjobConfig::load(config_path.as_deref())?;
    let stores = Stores::open(&config.store)?;

    match cli.command {
        Commands::Run { manifest } => {
            if let Some(path) = manifest {
                apply(&stores, &path).await?;
            }
            run(stores, config).await
        }
        Commands::Apply { file } => apply(&stores, &file).await,
        Commands::Get => get(&stores).await,
        Commands::Delete { job } => delete(&stores, &job).await,
    }
}

async fn run(stores: Stores, config: AtjobConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reconciler = Reconciler::new(
        stores.jobs.clone(),
        stores.units.clone(),
        Arc::new(SystemClock),
        config.controller.max_conflict_retries,
    );
    let controller = Controller::new(
        Arc::new(reconciler),
        stores.jobs.clone(),
        stores.units.clone(),
        config.controller.clone(),
    );
    let gc = GarbageCollector::new(stores.jobs.clone(), stores.units.clone());
    let gc_interval = Duration::from_secs(config.controller.gc_interval_secs);

    let mut tasks = vec![
        tokio::spawn(controller.run(shutdown_rx.clone())),
        tokio::spawn(gc.run(gc_interval, shutdown_rx.clone())),
    ];
    if config.runner.enabled {
        let runner = UnitRunner::new(stores.units.clone(), config.runner.clone());
        tasks.push(tokio::spawn(runner.run(shutdown_rx)));
    } else {
        warn!("local runner disabled; execution units will not be run by this process");
    }

    info!("atjob running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "task ended abnormally");
        }
    }
    Ok(())
}

async fn apply(stores: &Stores, path: &str) -> anyhow::Result<()> {
    let manifest = Manifest::from_file(path)?;
    for job in manifest.into_jobs() {
        let key = job.key();
        match stores.jobs.create(job).await {
            Ok(_) => println!("{key} created"),
            Err(e) if e.is_already_exists() => println!("{key} unchanged"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn get(stores: &Stores) -> anyhow::Result<()> {
    let jobs = stores.jobs.list().await?;
    println!("{:<32} {:<22} {:<10} REASON", "JOB", "SCHEDULE", "PHASE");
    for job in &jobs {
        println!("{}", job_row(job));
    }
    Ok(())
}

fn job_row(job: &ScheduledJob) -> String {
    format!(
        "{:<32} {:<22} {:<10} {}",
        job.key().to_string(),
        job.spec.schedule,
        job.status.phase.clone().normalize().to_string(),
        job.status.reason.as_deref().unwrap_or("")
    )
}

async fn delete(stores: &Stores, job: &str) -> anyhow::Result<()> {
    let key = ObjectKey::parse(job)?;
    match stores.jobs.delete(&key).await {
        Ok(()) => println!("{key} deleted"),
        Err(e) if e.is_not_found() => println!("{key} not found"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atjob_core::JobPhase;

    #[test]
    fn parses_commands() {
        let args = ["atjob", "--config", "/tmp/a.toml", "apply", "-f", "jobs.toml"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/a.toml"));
        assert!(matches!(cli.command, Commands::Apply { file } if file == "jobs.toml"));

        let cli = Cli::try_parse_from(["atjob", "delete", "team/nightly"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { job } if job == "team/nightly"));

        let cli = Cli::try_parse_from(["atjob", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { manifest: None }));

        assert!(Cli::try_parse_from(["atjob", "apply"]).is_err());
    }

    #[test]
    fn row_shows_normalized_phase_and_reason() {
        let mut job = ScheduledJob::new("default", "hi", "echo hi", "2030-01-01T00:00:00Z");
        assert!(job_row(&job).contains("Pending"));

        job.status.phase = JobPhase::Done;
        job.status.reason = Some("Completed".into());
        let row = job_row(&job);
        assert!(row.starts_with("default/hi "));
        assert!(row.contains("2030-01-01T00:00:00Z"));
        assert!(row.ends_with("Done       Completed"));
    }
}

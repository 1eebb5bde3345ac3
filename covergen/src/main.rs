use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use covergen::config::EngineConfig;
use covergen::domain::Caller;
use covergen::logging::init_logging;
use covergen::services::{CoverSubmission, JobStatusView, ServiceContainer, Upload};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log filter directive, e.g. `covergen=debug,sqlx=warn`
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool and the periodic asset collector until Ctrl-C
    Serve,

    /// Run the asset collector once and print its report
    Cleanup {
        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Override the retention window in hours
        #[arg(long)]
        ttl_hours: Option<u64>,
    },

    /// Submit a job, run it in-process and wait for the result
    Submit {
        /// Reference voice sample
        #[arg(long)]
        voice: PathBuf,

        /// Song to cover
        #[arg(long)]
        song: PathBuf,

        #[arg(long)]
        model_id: Option<String>,

        /// Pitch shift in semitones
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        pitch: i32,

        /// Owning user id
        #[arg(long)]
        owner: Option<String>,
    },

    /// Print the state of a job
    Status {
        job_id: String,

        /// Act as this user for owned jobs
        #[arg(long)]
        owner: Option<String>,
    },

    /// Print job counts per status
    Stats,

    /// Print finished runs, newest first
    History {
        /// Only runs owned by this user
        #[arg(long)]
        owner: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env().context("Failed to load configuration")?;

    let (logging, _guard) = init_logging(&config.log_dir).context("Failed to initialize logging")?;
    if let Some(directive) = &args.log_filter {
        logging.set_filter(directive)?;
    }
    info!(
        filter = %logging.get_filter(),
        log_dir = %logging.log_dir().display(),
        "Logging initialized"
    );

    let container = ServiceContainer::from_config(config)
        .await
        .context("Failed to initialize services")?;

    let result = match args.command {
        Command::Serve => {
            container.initialize().await?;
            container.register_background_task(
                logging.start_retention_cleanup(container.cancellation_token()),
            );
            info!("covergen is running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            Ok(())
        }
        Command::Cleanup { dry_run, ttl_hours } => {
            let retention = match ttl_hours {
                Some(hours) => container
                    .config
                    .collector
                    .clone()
                    .with_retention_hours(hours)
                    .retention(),
                None => container.config.collector.retention(),
            };
            let report = container
                .collector
                .run_with_retention(retention, dry_run)
                .await?;
            print_json(&report)
        }
        Command::Submit {
            voice,
            song,
            model_id,
            pitch,
            owner,
        } => {
            container.initialize().await?;
            let submission = CoverSubmission {
                caller: owner.map(Caller::user).unwrap_or_default(),
                reference_voice: read_upload(&voice).await?,
                song: read_upload(&song).await?,
                model_id,
                pitch_shift: pitch,
            };
            let submitted = container.cover_service.submit(submission).await?;
            info!(job_id = %submitted.job_id, "Waiting for job to finish");
            let job = container
                .cover_service
                .wait_for_completion(&submitted.job_id, Duration::from_secs(1))
                .await?;
            print_json(&JobStatusView::from(&job))?;
            if let Some(mix) = job.mix_path() {
                println!("{}", mix.display());
            }
            Ok(())
        }
        Command::Status { job_id, owner } => {
            let caller = owner.map(Caller::user).unwrap_or_default();
            let job = container.cover_service.status(&job_id, &caller).await?;
            print_json(&JobStatusView::from(&job))
        }
        Command::Stats => {
            let stats = container.stats().await?;
            print_json(&stats)
        }
        Command::History {
            owner,
            limit,
            offset,
        } => {
            let page = container
                .cover_service
                .history(owner.as_deref(), limit, offset)
                .await?;
            print_json(&page)
        }
    };

    container.shutdown().await?;
    result
}

async fn read_upload(path: &Path) -> anyhow::Result<Upload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut upload = Upload::new(bytes);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        upload = upload.with_filename(name);
    }
    Ok(upload)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

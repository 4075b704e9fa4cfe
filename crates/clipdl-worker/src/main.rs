//! clipdl command-line tool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipdl_account::credentials::DEVICE_ID_KEY;
use clipdl_account::{
    AccountCache, AccountService, BackendConfig, CredentialStore, HttpBackend,
    MemoryCredentialStore,
};
use clipdl_models::{AspectMode, ClipJob, JobEvent, Quality};
use clipdl_worker::{ClipPipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "clipdl", about = "Download a video and cut a clip from it")]
struct Cli {
    /// yt-dlp executable (overrides CLIPDL_YTDLP_PATH)
    #[arg(long, global = true)]
    ytdlp: Option<PathBuf>,
    /// FFmpeg executable (overrides CLIPDL_FFMPEG_PATH)
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,
    /// Content cache directory (overrides CLIPDL_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    /// Scratch directory (overrides CLIPDL_WORK_DIR)
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cut a clip from a video
    Clip(ClipArgs),
    /// Print video metadata as JSON
    Metadata { url: String },
    #[command(subcommand)]
    Cache(CacheCommand),
    #[command(subcommand)]
    Account(AccountCommand),
}

#[derive(Args)]
struct ClipArgs {
    url: String,
    /// Start timestamp (HH:MM:SS)
    #[arg(long)]
    start: String,
    /// End timestamp (HH:MM:SS)
    #[arg(long)]
    end: String,
    /// original, vertical, square or classic
    #[arg(long, default_value = "original")]
    aspect: String,
    /// best, 2160p, 1440p, 1080p, 720p, 480p or 360p
    #[arg(long, default_value = "720p")]
    quality: String,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cache usage
    Stats,
    /// Remove expired entries
    Purge,
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Show credits and license state
    Status,
    /// Activate a license key
    Activate { key: String },
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(path) = cli.ytdlp {
        config.ytdlp_path = Some(path);
    }
    if let Some(path) = cli.ffmpeg {
        config.ffmpeg_path = Some(path);
    }
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    if let Some(dir) = cli.work_dir {
        config.work_dir = dir;
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            trigger.cancel();
        }
    });

    match cli.command {
        Command::Clip(args) => {
            if let Some(dir) = args.output_dir.clone() {
                config.output_dir = dir;
            }
            let pipeline = ClipPipeline::from_config(config, account_service().await?).await?;
            run_clip(&pipeline, args, &cancel).await
        }
        Command::Metadata { url } => {
            let pipeline = ClipPipeline::from_config(config, None).await?;
            let metadata = pipeline.metadata(&url, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
        Command::Cache(CacheCommand::Stats) => {
            let pipeline = ClipPipeline::from_config(config, None).await?;
            let cache = pipeline.cache();
            println!(
                "{} entries, {} of {} bytes in {}",
                cache.len().await,
                cache.total_size().await,
                cache.max_bytes(),
                cache.root().display()
            );
            Ok(())
        }
        Command::Cache(CacheCommand::Purge) => {
            let pipeline = ClipPipeline::from_config(config, None).await?;
            let removed = pipeline.cache().purge_expired().await;
            println!("Removed {} expired entries", removed);
            Ok(())
        }
        Command::Account(command) => {
            let service = account_service()
                .await?
                .context("CLIPDL_BACKEND_URL is not set")?;
            let snapshot = match command {
                AccountCommand::Status => service.snapshot(true, &cancel).await?,
                AccountCommand::Activate { key } => service.activate_license(&key, &cancel).await?,
            };
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}

async fn run_clip(pipeline: &ClipPipeline, args: ClipArgs, cancel: &CancellationToken) -> Result<()> {
    let aspect: AspectMode = args.aspect.parse()?;
    let mut job = ClipJob::new(
        args.url,
        args.start,
        args.end,
        aspect,
        Quality::from_label(&args.quality),
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                JobEvent::Progress { value, .. } => eprint!("\r{:5.1}%", value * 100.0),
                JobEvent::Notice { notice, .. } => eprintln!("\n{}", notice.message()),
                _ => {}
            }
        }
        eprintln!();
    });

    let result = pipeline.run(&mut job, cancel, Some(tx)).await;
    printer.await.ok();

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            if e.needs_account_action() {
                eprintln!("Run `clipdl account activate <key>` to continue.");
            } else if e.is_retryable() {
                eprintln!("This looks temporary; try again in a few minutes.");
            }
            return Err(e.into());
        }
    };
    println!("{}", output.display());
    Ok(())
}

/// Account service from `CLIPDL_BACKEND_*`, or `None` when no backend is set.
async fn account_service() -> Result<Option<AccountService>> {
    let Some(backend_config) = BackendConfig::from_env() else {
        return Ok(None);
    };

    let retry = backend_config.retry.clone();
    let backend = HttpBackend::new(backend_config)?;

    let credentials = MemoryCredentialStore::new();
    if let Ok(device_id) = std::env::var("CLIPDL_DEVICE_ID") {
        credentials.put(DEVICE_ID_KEY, device_id.as_bytes()).await;
    }

    Ok(Some(AccountService::new(
        Arc::new(backend),
        Arc::new(AccountCache::new()),
        Arc::new(credentials),
        retry,
    )))
}

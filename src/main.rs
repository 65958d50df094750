use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use catalog_fetch::format::QualityTier;
use catalog_fetch::http_client::HttpCatalogClient;
use catalog_fetch::link::CatalogLink;
use catalog_fetch::paths::TemplatePaths;
use catalog_fetch::pipeline::Pipeline;
use catalog_fetch::progress::{format_duration, set_log_only};
use catalog_fetch::settings::Settings;
use catalog_fetch::tagger::LoftyTagger;

#[derive(Parser)]
#[command(name = "catalog-fetch")]
#[command(about = "Download tracks, albums, playlists and artists from a music catalog")]
struct Args {
    /// Catalog links (https://www.deezer.com/<lang>/album/<id>, album:<id>, ...)
    #[arg(required = true)]
    links: Vec<String>,

    /// Settings file (TOML); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Quality tier for this run (flac, mp3_320, mp3_128, 360_hq, 360_mq, 360_lq)
    #[arg(long)]
    bitrate: Option<String>,

    /// Base URL of the catalog gateway
    #[arg(long, default_value = "http://localhost:8080")]
    catalog_url: String,

    #[arg(long, default_value_t = 60)]
    timeout_sec: u64,

    /// Overrides download_location
    #[arg(long)]
    output: Option<PathBuf>,

    /// Overrides queue_concurrency
    #[arg(long)]
    workers: Option<usize>,

    /// Hide progress bars; log progress lines instead
    #[arg(long)]
    log_only: bool,
}

fn init_logging() {
    let initialized = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init();
    if let Err(e) = initialized {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn run_post_command(settings: &Settings, folder: &Path) -> Result<()> {
    let Some(command) = settings.post_command(folder) else {
        return Ok(());
    };
    info!("Running: {}", command);
    let status = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .with_context(|| format!("Failed to run command: {}", command))?;
    if !status.success() {
        warn!("Command exited with {}", status);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    set_log_only(args.log_only);

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(output) = args.output {
        settings.download_location = output;
    }
    if let Some(workers) = args.workers {
        settings.queue_concurrency = workers;
    }
    settings.validate()?;

    let quality: Option<QualityTier> = args
        .bitrate
        .as_deref()
        .map(str::parse::<QualityTier>)
        .transpose()
        .context("Invalid --bitrate")?;

    let client = HttpCatalogClient::new(&args.catalog_url, args.timeout_sec)?;
    let pipeline = Pipeline::new(&client, &settings, &TemplatePaths, &LoftyTagger);

    let start = Instant::now();
    let mut failures = 0usize;

    for raw in &args.links {
        let link: CatalogLink = match raw.parse() {
            Ok(link) => link,
            Err(e) => {
                warn!("{}", e);
                failures += 1;
                continue;
            }
        };
        info!("Processing {}", link);
        match pipeline.download_link(&link, quality) {
            Ok(Some(folder)) => {
                info!(folder = %folder.display(), "{} finished", link);
                run_post_command(&settings, &folder)?;
            }
            Ok(None) => info!("{} finished, nothing written", link),
            Err(e) => {
                error!("{}: {:#}", link, e);
                failures += 1;
            }
        }
    }

    info!(
        "Processed {} links ({} failed) in {}",
        args.links.len(),
        failures,
        format_duration(start.elapsed())
    );
    Ok(())
}

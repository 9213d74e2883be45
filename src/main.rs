//! Command-line front end for the download and playback engine

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tubetone::playback::RodioBackend;
use tubetone::runtime::runtime;
use tubetone::source::{ReqwestFetcher, resolve};
use tubetone::{
    DownloadJob, DownloadNames, DownloadRegistry, DownloadStatus, EngineConfig,
    PlaybackCoordinator, SourceReference, ThumbnailSize, effects, format,
};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct CliArgs {
    /// Path to a TOML configuration file.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the audio and thumbnail of a link, video id, playlist id or search query.
    Download {
        reference: String,

        /// Directory receiving `<name>.<ext>` and `<name>.png`.
        #[clap(long, default_value = "./downloads")]
        dir: PathBuf,

        /// Base name for both files; a thumbnail failure then aborts the download.
        #[clap(long)]
        name: Option<String>,

        /// Thumbnail width; the default is the largest centered square.
        #[clap(long, requires = "height")]
        width: Option<u32>,

        #[clap(long, requires = "width")]
        height: Option<u32>,

        /// Skip the thumbnail stage.
        #[clap(long)]
        no_thumbnail: bool,
    },
    /// Play files one after another in the primary slot.
    Play {
        files: Vec<PathBuf>,

        /// Play all files at once as transient sessions.
        #[clap(long)]
        transient: bool,
    },
    /// Report the content-verified format of each file.
    Validate { files: Vec<PathBuf> },
    /// Write a band-passed copy of an audio file.
    Filter { input: PathBuf, output: PathBuf },
}

/// Program entry point: sets up logging and dispatches the subcommand
fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let config = EngineConfig::load_or_default(cli_args.config.as_deref())?;

    match cli_args.command {
        Command::Download {
            reference,
            dir,
            name,
            width,
            height,
            no_thumbnail,
        } => {
            let size = match (width, height) {
                (Some(width), Some(height)) => ThumbnailSize::Exact { width, height },
                _ => ThumbnailSize::AutoSquare,
            };
            let names = name.map(DownloadNames::combined).unwrap_or_default();
            download(config, &reference, dir, names, size, no_thumbnail)
        }
        Command::Play { files, transient } => play(&config, &files, transient),
        Command::Validate { files } => validate(&files),
        Command::Filter { input, output } => runtime()?
            .block_on(effects::apply_band_pass(&config, &input, &output))
            .context("Band-pass filter failed"),
    }
}

fn download(
    config: EngineConfig,
    reference: &str,
    dir: PathBuf,
    names: DownloadNames,
    size: ThumbnailSize,
    no_thumbnail: bool,
) -> Result<()> {
    let fetcher = ReqwestFetcher::new(&config)?;
    let reference = SourceReference::parse(reference);
    let source = resolve(&reference, &fetcher, &config)
        .with_context(|| format!("Could not resolve {:?}", reference))?;

    let registry = Arc::new(DownloadRegistry::new());
    let job = Arc::new(DownloadJob::new(source, dir, names, size, config));
    registry.add_active_download(Arc::clone(&job));

    let shutdown = Arc::clone(&registry);
    ctrlc::set_handler(move || {
        warn!("Interrupted, canceling downloads");
        shutdown.cancel_all();
    })
    .context("Failed to install Ctrl-C handler")?;

    let bar = ProgressBar::new(1000);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let progress_bar = bar.clone();
    job.on_progress(move |snap| {
        progress_bar.set_position((snap.percent.clamp(0.0, 100.0) * 10.0) as u64);
        progress_bar.set_message(format!("{} at {} ETA {}", snap.size, snap.rate, snap.eta));
    });

    if no_thumbnail {
        job.download_audio()?;
    } else {
        job.download_audio_and_thumbnail(&fetcher)?;
    }

    let status = job.wait();
    bar.finish_and_clear();
    registry.remove_active_download(job.id());

    match status {
        DownloadStatus::Done => {
            info!("Saved {}", job.audio_file()?.display());
            Ok(())
        }
        DownloadStatus::Canceled => {
            info!("Download canceled");
            Ok(())
        }
        other => bail!(
            "Download ended {}: {}",
            other,
            job.failure_message().unwrap_or_default()
        ),
    }
}

fn play(config: &EngineConfig, files: &[PathBuf], transient: bool) -> Result<()> {
    for file in files {
        if !format::is_supported_audio(file).with_context(|| format!("Cannot read {:?}", file))? {
            bail!("{:?} is not a supported audio file", file);
        }
    }

    let coordinator = Arc::new(PlaybackCoordinator::new(
        Arc::new(RodioBackend),
        config.playback_poll(),
    ));
    let shutdown = Arc::clone(&coordinator);
    ctrlc::set_handler(move || shutdown.cancel_all())
        .context("Failed to install Ctrl-C handler")?;

    if transient {
        let sessions = files
            .iter()
            .map(|f| coordinator.play_transient(f))
            .collect::<Result<Vec<_>, _>>()?;
        sessions.iter().for_each(|s| s.wait());
        return Ok(());
    }

    for file in files {
        let session = coordinator.play_primary(file)?;
        session.wait();
        if session.is_canceled() {
            break;
        }
    }
    Ok(())
}

fn validate(files: &[PathBuf]) -> Result<()> {
    for file in files {
        match format::classify(file) {
            Ok(Some(descriptor)) => println!(
                "{}: {:?} ({})",
                file.display(),
                descriptor.kind,
                descriptor.extension
            ),
            Ok(None) => println!("{}: unsupported", file.display()),
            Err(e) => println!("{}: {}", file.display(), e),
        }
    }
    Ok(())
}

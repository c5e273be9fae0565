use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_courier::cli::{Cli, Commands, ServerAction};
use media_courier::config::{ServerProfile, ServerProfiles, SettingsStore};
use media_courier::job::{Destination, JobRequest, MediaKind, VideoQuality};
use media_courier::pipeline::{default_temp_dir, sweep_temp_dir, JobRunner, Pipeline};
use media_courier::progress::{event_channel, CancelFlag, Event, LogKind};
use media_courier::ssh::{RemoteSession, Ssh2Delivery, Ssh2Session};
use media_courier::transcribe::{WhisperCli, WhisperModel};
use media_courier::utils;
use media_courier::{OutcomeKind, YtDlpFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_courier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            url,
            output,
            server,
            remote_folder,
            format,
            quality,
            transcribe,
            model,
            language,
        } => {
            let options = DownloadOptions {
                url,
                output,
                server,
                remote_folder,
                format,
                quality,
                transcribe,
                model,
                language,
            };
            run_download(options, cli.quiet).await?;
        }
        Commands::Servers { action } => run_servers(action).await?,
        Commands::Config { default_format } => {
            if let Some(format) = default_format {
                let settings = SettingsStore::open(SettingsStore::default_path()?);
                settings.set_default_format(format)?;
                println!("{} Default format set to {}", style("✓").green(), format.as_str());
            } else {
                show_config()?;
            }
        }
        Commands::Models => {
            println!("Available Whisper models:");
            for model in WhisperModel::value_variants() {
                println!("  • {:<8} {}", model.as_str(), model.description());
            }
        }
        Commands::Platforms => {
            println!("Supported platforms:");
            println!("  • YouTube (youtube.com, youtu.be)");
            println!("  • Twitter/X (twitter.com, x.com)");
            println!("  • Vimeo (vimeo.com)");
            println!("  • SoundCloud (soundcloud.com)");
            println!("  • Twitch (twitch.tv)");
        }
    }

    Ok(())
}

struct DownloadOptions {
    url: String,
    output: Option<PathBuf>,
    server: Option<String>,
    remote_folder: Option<String>,
    format: Option<MediaKind>,
    quality: VideoQuality,
    transcribe: bool,
    model: WhisperModel,
    language: Option<String>,
}

async fn run_download(options: DownloadOptions, quiet: bool) -> Result<()> {
    // Check for required external dependencies (non-fatal)
    let missing_deps = utils::check_dependencies().await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }

    // Leftovers from a crashed run are swept before the job starts.
    sweep_temp_dir(&default_temp_dir());

    let settings = Arc::new(SettingsStore::open(SettingsStore::default_path()?));

    // Inputs are validated synchronously before any work is launched.
    utils::validate_url(&options.url)?;
    let destination = resolve_destination(&options, &settings)?;
    let format = options
        .format
        .or_else(|| settings.default_format())
        .unwrap_or(MediaKind::Audio);

    if options.transcribe && format != MediaKind::Audio {
        eprintln!(
            "{} Transcription applies to audio downloads only and will be skipped",
            style("!").yellow().bold()
        );
    }
    if options.transcribe && matches!(destination, Destination::Remote(_)) {
        eprintln!(
            "{} Transcription is skipped for server uploads",
            style("!").yellow().bold()
        );
    }

    let fetcher = Arc::new(YtDlpFetcher::ensure_binary().await?);
    let pipeline = Arc::new(Pipeline::new(
        fetcher,
        Arc::new(Ssh2Delivery::new()),
        Arc::new(WhisperCli::new()),
        settings,
    ));
    let runner = JobRunner::new(pipeline);

    let job = JobRequest {
        source_url: options.url,
        destination,
        kind: format,
        quality: options.quality,
        transcribe: options.transcribe,
        transcription_model: options.model,
        language: options.language,
    };

    let (events, mut rx) = event_channel();
    let cancel = CancelFlag::new();
    runner.try_start(job, events, cancel.clone())?;

    // Ctrl-C requests cooperative cancellation; the job cleans up and
    // reports a cancelled outcome on its own.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let bar = if quiet { None } else { Some(make_progress_bar()) };

    let mut outcome = None;
    while let Some(event) = rx.recv().await {
        match event {
            Event::Progress { percent, message } => {
                if let Some(bar) = &bar {
                    bar.set_position(percent as u64);
                    bar.set_message(message);
                }
            }
            Event::Log { kind, message } => {
                let line = match kind {
                    LogKind::Info => format!("{} {}", style("•").cyan(), message),
                    LogKind::Success => format!("{} {}", style("✓").green(), message),
                    LogKind::Warning => format!("{} {}", style("!").yellow().bold(), message),
                    LogKind::Error => format!("{} {}", style("✗").red().bold(), message),
                };
                match &bar {
                    Some(bar) => bar.println(line),
                    None => eprintln!("{}", line),
                }
            }
            Event::Finished(terminal) => {
                outcome = Some(terminal);
                break;
            }
        }
    }

    let outcome = outcome.ok_or_else(|| anyhow!("job ended without reporting an outcome"))?;
    match outcome.kind {
        OutcomeKind::Success => {
            if let Some(bar) = &bar {
                bar.finish_and_clear();
            }
            println!("{}", outcome.message);
            Ok(())
        }
        OutcomeKind::Cancelled => {
            if let Some(bar) = &bar {
                bar.abandon_with_message("Cancelled");
            }
            println!("Download cancelled");
            Ok(())
        }
        OutcomeKind::Failure => {
            if let Some(bar) = &bar {
                bar.abandon();
            }
            Err(anyhow!(outcome.message))
        }
    }
}

fn resolve_destination(
    options: &DownloadOptions,
    settings: &SettingsStore,
) -> Result<Destination> {
    if let Some(name) = &options.server {
        let profiles = ServerProfiles::open(ServerProfiles::default_path()?);
        let profile = profiles
            .get(name)
            .ok_or_else(|| anyhow!("unknown server profile: {} (see `media-courier servers list`)", name))?;
        let mut target = profile.to_target();
        if let Some(folder) = &options.remote_folder {
            target.remote_folder = folder.clone();
        }
        return Ok(Destination::Remote(target));
    }

    let folder = options
        .output
        .clone()
        .or_else(|| settings.last_local_folder())
        .ok_or_else(|| anyhow!("no destination folder: pass --output or --server"))?;
    utils::validate_folder(&folder)?;
    Ok(Destination::Local(folder))
}

fn make_progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap(),
    );
    bar
}

async fn run_servers(action: ServerAction) -> Result<()> {
    let mut profiles = ServerProfiles::open(ServerProfiles::default_path()?);

    match action {
        ServerAction::List => {
            if profiles.list().is_empty() {
                println!("No server profiles saved. Add one with `media-courier servers add`.");
                return Ok(());
            }
            println!("Saved server profiles:");
            for profile in profiles.list() {
                let auth = if profile.key_file.is_some() {
                    "key file"
                } else if profile.password.is_some() {
                    "password"
                } else {
                    "ssh agent"
                };
                println!(
                    "  • {}: {}@{}:{} -> {} ({})",
                    style(&profile.name).bold(),
                    profile.username,
                    profile.host,
                    profile.port,
                    profile.remote_folder,
                    auth
                );
                if !profile.description.is_empty() {
                    println!("      {}", style(&profile.description).dim());
                }
            }
        }
        ServerAction::Add {
            name,
            host,
            port,
            username,
            password,
            key_file,
            remote_folder,
            description,
        } => {
            profiles.add(ServerProfile {
                name: name.clone(),
                host,
                port,
                username,
                password,
                key_file,
                remote_folder,
                description,
            })?;
            println!("{} Server profile '{}' saved", style("✓").green(), name);
        }
        ServerAction::Remove { name } => {
            if profiles.remove(&name)? {
                println!("{} Server profile '{}' removed", style("✓").green(), name);
            } else {
                println!("No server profile named '{}'", name);
            }
        }
        ServerAction::Browse { name, folder } => {
            let profile = profiles
                .get(&name)
                .ok_or_else(|| anyhow!("unknown server profile: {}", name))?;
            let target = profile.to_target();
            let path = folder.unwrap_or_else(|| target.remote_folder.clone());

            // ssh2 sessions are blocking; keep the whole exchange off the
            // async runtime.
            let listing_path = path.clone();
            let entries = tokio::task::spawn_blocking(move || {
                let mut session = Ssh2Session::connect(&target)?;
                let entries = session.list_dir(&listing_path);
                session.close();
                entries
            })
            .await??;

            println!("Contents of {} on '{}':", path, name);
            for entry in entries {
                println!("  {}", entry);
            }
        }
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let settings_path = SettingsStore::default_path()?;
    let settings = SettingsStore::open(&settings_path);
    let profiles = ServerProfiles::open(ServerProfiles::default_path()?);

    println!("Configuration ({})", settings_path.display());
    match settings.last_local_folder() {
        Some(folder) => println!("  Last local folder:  {}", folder.display()),
        None => println!("  Last local folder:  (none)"),
    }
    match settings.last_remote_folder() {
        Some(folder) => println!("  Last remote folder: {}", folder),
        None => println!("  Last remote folder: (none)"),
    }
    match settings.default_format() {
        Some(format) => println!("  Default format:     {}", format.as_str()),
        None => println!("  Default format:     audio"),
    }
    println!("  Server profiles:    {}", profiles.list().len());
    Ok(())
}

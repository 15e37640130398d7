use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stumpcam::{
    FileCaptureDevice, HttpProcessingEndpoint, LocalMediaStore, MediaPipeline, PurgeScope,
    StumpcamConfig,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "stumpcam")]
#[command(about = "Capture, cache and upload stump media for remote processing")]
#[command(version)]
#[command(long_about = "Feeds a reference image and a video clip through the stumpcam \
pipeline: files are cached and validated locally, uploaded as one multipart request, \
retried once with the reference image on transient processing failures, and the \
returned image is stored for display.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stumpcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a reference image and a clip, then print the session summary
    Submit {
        /// Reference (stump) image
        #[arg(long, value_name = "PATH")]
        image: PathBuf,

        /// Video clip
        #[arg(long, value_name = "PATH")]
        video: PathBuf,
    },
    /// Delete cached session files
    Purge {
        /// Also delete promoted files in the durable area
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting stumpcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match StumpcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    match args.command {
        Some(Command::Submit { image, video }) => submit(config, image, video).await,
        Some(Command::Purge { all }) => purge(config, all).await,
        None => {
            eprintln!("No command given; see --help");
            std::process::exit(2);
        }
    }
}

async fn submit(config: StumpcamConfig, image: PathBuf, video: PathBuf) -> Result<()> {
    let endpoint =
        HttpProcessingEndpoint::new(&config.upload).context("Failed to create HTTP client")?;
    let device = FileCaptureDevice::new(Some(image), Some(video));
    let pipeline = MediaPipeline::new(config, Arc::new(device), Arc::new(endpoint));

    pipeline.initialize().await?;
    pipeline.capture_reference().await?;
    pipeline.start_clip().await?;
    pipeline
        .stop_clip()
        .await?
        .context("Recorder produced no clip")?;

    let outcome = pipeline.upload().await;

    let summary = serde_json::to_string_pretty(&pipeline.summary())?;
    println!("{}", summary);

    match outcome {
        Ok(result) => {
            info!("Processed image stored at {}", result.storage_uri.display());
            Ok(())
        }
        Err(e) => {
            error!("Upload did not succeed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn purge(config: StumpcamConfig, all: bool) -> Result<()> {
    let scope = if all { PurgeScope::All } else { PurgeScope::Session };
    let store = LocalMediaStore::with_local_fs(
        config.storage.clone(),
        Arc::new(stumpcam::EventBus::new(config.system.event_bus_capacity)),
    );

    let report = store.purge(scope).await?;
    println!(
        "✓ Removed {} files ({} already absent)",
        report.files_removed, report.already_absent
    );
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stumpcam={}", log_level)));

    // Logs go to stderr so the JSON summary on stdout stays parseable
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Stumpcam Configuration File");
    println!("# Every key can be overridden with STUMPCAM__<SECTION>__<KEY>");
    println!();
    let rendered = toml::to_string_pretty(&StumpcamConfig::default())
        .context("Failed to render default configuration")?;
    println!("{}", rendered);
    Ok(())
}

//! Findr CLI — serve analysis sessions and inspect pipelines offline.
//!
//! Usage:
//!   findr serve [OPTIONS]        Start the HTTP server
//!   findr check                  List capabilities and the linked model runtime
//!   findr validate <PATH>        Statically validate a pipeline configuration
//!   findr sample <LOCATOR>       Dry-run frame sampling over a source

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "findr",
    about = "Adaptive video analysis sessions over HTTP",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address (overrides the config file)
        #[arg(long)]
        bind: Option<String>,

        /// Port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// JPEG quality for the frame stream, 1-100
        #[arg(long)]
        jpeg_quality: Option<u8>,
    },

    /// List registered capabilities and whether a model runtime is linked
    Check,

    /// Validate a pipeline configuration without loading any model
    Validate {
        /// JSON file holding a pipeline configuration or a full session request
        path: PathBuf,
    },

    /// Print the scheduler's decision for every frame of a source
    Sample {
        /// Image directory, image file, or synthetic://<count> locator
        locator: String,

        #[command(flatten)]
        mode: SampleMode,

        /// Force a full run after this many extrapolated frames (0 disables)
        #[arg(long)]
        max_extrapolations: Option<u32>,

        /// Stop after this many frames
        #[arg(long)]
        limit: Option<u64>,

        /// Frame rate assumed for image sequences
        #[arg(long)]
        fps: Option<f64>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SampleMode {
    /// Run the full pipeline every N frames
    #[arg(long)]
    stride: Option<u32>,

    /// Run the full pipeline when the scene-change score exceeds T
    #[arg(long)]
    threshold: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = findr_common::config::AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    findr_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Serve {
            bind,
            port,
            jpeg_quality,
        } => commands::serve::run(config, bind, port, jpeg_quality).await,
        Commands::Check => commands::check::run(),
        Commands::Validate { path } => commands::validate::run(path, &config),
        Commands::Sample {
            locator,
            mode,
            max_extrapolations,
            limit,
            fps,
        } => commands::sample::run(
            locator,
            mode.stride,
            mode.threshold,
            max_extrapolations,
            limit,
            fps,
            &config,
        ),
    }
}

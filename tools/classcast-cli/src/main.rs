//! ClassCast CLI: run and inspect live-class streaming sessions.
//!
//! Usage:
//!   classcast simulate [OPTIONS]     Run a full session against synthetic devices
//!   classcast record [OPTIONS]       Record locally from real devices
//!   classcast layout [SOURCES]...    Print a resolved layout as JSON
//!   classcast check                  Check capture and recorder support

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use classcast_common::config::AppConfig;
use classcast_media_model::LayoutType;

mod commands;

#[derive(Parser)]
#[command(
    name = "classcast",
    about = "Compose cameras and screens into one live stream and record it",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/classcast/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a publish + record session against the synthetic platform
    Simulate {
        /// Session identifier sent to the router
        #[arg(short, long, default_value = "simulation")]
        session: String,

        /// How long to stay live (seconds)
        #[arg(long, default_value = "5")]
        seconds: f64,

        /// Number of synthetic cameras (0-2)
        #[arg(long, default_value = "1")]
        cameras: usize,

        /// Share the synthetic screen (with audio)
        #[arg(long)]
        screen: bool,

        /// Add the synthetic microphone
        #[arg(long)]
        mic: bool,

        /// Publish only, do not record
        #[arg(long)]
        no_record: bool,

        /// Layout type: pip or custom
        #[arg(long, default_value = "pip")]
        layout: LayoutType,

        /// End the first camera after this many seconds to exercise recovery
        #[arg(long)]
        end_camera_after: Option<f64>,

        /// Write the recording to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record the composite of real devices until Ctrl+C
    Record {
        /// Session identifier, also the file name
        #[arg(short, long, default_value = "recording")]
        session: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Camera device (repeatable), e.g. /dev/video0
        #[arg(long)]
        camera: Vec<String>,

        /// Capture the screen
        #[arg(long)]
        screen: bool,

        /// Zero-based monitor index for --screen
        #[arg(long, default_value = "0")]
        monitor: usize,

        /// Disable microphone capture
        #[arg(long)]
        no_mic: bool,
    },

    /// Print the resolved layout for a list of sources
    Layout {
        /// Sources in order: `screen` or `camera:<device>`
        #[arg(required = true)]
        sources: Vec<String>,

        /// Layout type: pip or custom
        #[arg(long, default_value = "pip")]
        layout: LayoutType,
    },

    /// Check capture and recorder support on this machine
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    classcast_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Simulate {
            session,
            seconds,
            cameras,
            screen,
            mic,
            no_record,
            layout,
            end_camera_after,
            output,
        } => {
            commands::simulate::run(
                config,
                commands::simulate::SimulateOptions {
                    session,
                    seconds,
                    cameras,
                    screen,
                    mic,
                    record: !no_record,
                    layout,
                    end_camera_after,
                    output,
                },
            )
            .await
        }
        Commands::Record {
            session,
            output,
            camera,
            screen,
            monitor,
            no_mic,
        } => {
            commands::record::run(
                config,
                commands::record::RecordOptions {
                    session,
                    output,
                    cameras: camera,
                    screen,
                    monitor,
                    mic: !no_mic,
                },
            )
            .await
        }
        Commands::Layout { sources, layout } => commands::layout::run(&config, &sources, layout),
        Commands::Check => commands::check::run(&config).await,
    }
}

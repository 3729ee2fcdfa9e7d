// SPDX-License-Identifier: GPL-3.0-only

use attendance_scanner::backends::decode::DecodeBackendKind;
use attendance_scanner::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "attendance-scanner")]
#[command(about = "Record attendance by scanning student QR codes")]
#[command(version = attendance_scanner::constants::app_info::version())]
struct Cli {
    /// Configuration file (default: <config dir>/attendance-scanner/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the hosting origin used for the secure-context check
    #[arg(long, global = true)]
    origin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Check secure context, devices and camera permission
    Diagnose,

    /// Run a scanning session, printing recorded attendance as JSON lines
    Scan {
        /// Subject to open the attendance session for
        #[arg(short, long)]
        subject: String,

        /// Type codes on stdin instead of using the camera
        #[arg(short, long)]
        manual: bool,

        /// Decode backend (continuous, single-shot, manual-input)
        #[arg(short, long)]
        backend: Option<DecodeBackendKind>,

        /// Camera device to use (from 'list')
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Decode QR codes from image files through the virtual camera
    Decode {
        /// Image files or directories of images
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Stop after the first code
        #[arg(long)]
        first: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=attendance_scanner=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(origin) = cli.origin {
        config.origin = origin;
    }

    match cli.command {
        Commands::List => cli::list_cameras(&config),
        Commands::Diagnose => cli::diagnose(&config),
        Commands::Scan {
            subject,
            manual,
            backend,
            device,
        } => {
            if let Some(device) = device {
                config.preferred_device = Some(device);
            }
            let kind = if manual {
                DecodeBackendKind::ManualInput
            } else {
                backend.unwrap_or(config.backend)
            };
            cli::scan(&config, &subject, kind)
        }
        Commands::Decode { images, first } => cli::decode_images(&config, &images, first),
    }
}

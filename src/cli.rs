use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "livefeed")]
#[command(author, version, about = "Live H.264 streaming over HLS with fragmented MP4")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream an H.264 Annex-B file as a live HLS feed
    Serve {
        /// Raw .h264 elementary stream to replay
        #[arg(short, long, required = true)]
        input: PathBuf,

        /// Restart from the beginning when the file ends
        #[arg(long = "loop")]
        looping: bool,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Quality preset: reliable or realtime (overrides config)
        #[arg(short, long)]
        quality: Option<livefeed::config::QualityMode>,
    },

    /// Decode the SPS/PPS of an H.264 file and check HLS compatibility
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lumasync", about = "Music-synchronized light show driver")]
pub struct Cli {
    /// Config file (defaults to ./lumasync.toml, then ~/.config/lumasync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Default log level; RUST_LOG overrides it
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play songs in order with synchronized lights
    Play {
        /// Songs to play (WAV, MP3, FLAC, OGG, or anything the transcoder reads)
        #[arg(short, long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Show state file holding play_now and song_to_play
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Build missing or stale analysis caches
    Cache {
        /// Song files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Search directories recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// Drive the lights from a live capture device
    AudioIn,

    /// Exercise the lights without music
    Lights {
        #[arg(long, value_enum)]
        state: LightState,

        /// Channels to use, 1-based and comma-separated (default: all)
        #[arg(long, value_delimiter = ',')]
        light: Vec<usize>,

        /// Seconds between steps
        #[arg(long, default_value_t = 0.5)]
        sleep: f64,

        /// Repetitions per light for flash and fade
        #[arg(long, default_value_t = 5)]
        flashes: usize,
    },

    /// Report format and cache status of songs as JSON
    Scan {
        /// File or directory
        path: PathBuf,

        /// Search directories recursively
        #[arg(short, long)]
        recursive: bool,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightState {
    On,
    Off,
    Flash,
    Fade,
    Cleanup,
}

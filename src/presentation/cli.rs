// Command-line interface definitions
use crate::domain::telemetry::ChannelKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "race-telemetry")]
#[command(about = "Parse, render and stream race telemetry", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to config/telemetry.* when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse a telemetry log and report progress
    Parse(ParseArgs),
    /// Render a telemetry log as an SVG track
    Track(TrackArgs),
    /// Open the live channels and print every decoded message
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct ParseArgs {
    /// Positional telemetry file with [columnnames] and [data] sections
    pub file: PathBuf,

    /// Print every record as a JSON line once parsing completes
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TrackArgs {
    pub file: PathBuf,

    #[arg(long)]
    pub width: Option<f64>,

    #[arg(long)]
    pub height: Option<f64>,

    #[arg(long)]
    pub margin: Option<f64>,

    /// Coordinates are a local frame; draw them around the first sample
    #[arg(long)]
    pub relative: bool,

    /// Write the SVG here instead of stdout
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Logger to subscribe to
    #[arg(long)]
    pub logger: Option<String>,

    /// Channels to open, comma separated
    #[arg(long, value_delimiter = ',', default_value = "sensor,realtime,history,status")]
    pub channels: Vec<ChannelKind>,
}

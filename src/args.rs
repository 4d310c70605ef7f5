use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["trace", "frames"])))]
pub struct Args {
    /// Settings file (JSON). Missing file means defaults.
    #[arg(short, long, default_value = "winkcharge.json")]
    pub config: PathBuf,

    /// Replay presence samples from a JSON-lines trace
    #[arg(long)]
    pub trace: Option<PathBuf>,

    /// Detect the marker in IR frames stored in this directory
    #[arg(long)]
    pub frames: Option<PathBuf>,

    /// Log light commands instead of sending them
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Assume the light starts switched on
    #[arg(long, default_value_t = false)]
    pub initial_light_on: bool,
}

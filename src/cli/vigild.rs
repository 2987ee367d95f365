use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub const NAME: &str = "vigild";

#[derive(Parser, Debug, Clone)]
#[command(name = NAME)]
#[command(about = "Vigil security agent")]
#[command(version = crate::metadata::VERSION)]
pub struct VigilDaemonOpts {
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// File of JSON kernel events, `-` for standard input
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// File or fifo of reviewer decisions, one JSON `{"request_id", "allowed"}` per line
    #[arg(long)]
    pub decisions: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

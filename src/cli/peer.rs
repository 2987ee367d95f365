use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub const NAME: &str = "vigil-peer";

#[derive(Parser, Debug, Clone)]
#[command(name = NAME)]
#[command(about = "Vigil privileged metadata peer")]
#[command(version = crate::metadata::VERSION)]
pub struct PeerOpts {
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Unix socket to listen on, overrides `[peer] socket_path`
    #[arg(long)]
    pub socket_path: Option<String>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

use anyhow::Result;
use clap::Parser;
use vigil::cli::peer::PeerOpts;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = PeerOpts::parse();

    vigil::init_logger(Some(opts.verbosity.log_level_filter()));

    match vigil::peer::vigil_peer_run(&opts).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            vigil::cli::report_error(&e);
            std::process::exit(1);
        }
    }
}

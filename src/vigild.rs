//! Agent entrypoint: loads the configuration, connects the kernel event
//! source and runs the [`SecurityAgent`] until the source disconnects or a
//! termination signal is received.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use metadata_extractor::{DelegatedSource, LocalSource, MetadataExtractor};
use parking_lot::Mutex;
use peer_api::client::PeerClient;
use proc_common::ProcfsReader;
use tokio::{
    io::{AsyncBufRead, BufReader},
    signal::unix::{SignalKind, signal},
};

use crate::{
    agent::{
        AgentConfig, AgentExit, SecurityAgent,
        source::{read_decisions, read_events},
    },
    cli::vigild::VigilDaemonOpts,
    config::{AGENT_SECTION, CONSOLE_SECTION, ROUTER_SECTION, VigilConfig, watch_router_config},
    console::{ConsoleConfig, counters_table, spawn_console_sink},
};

pub async fn vigil_daemon_run(options: &VigilDaemonOpts) -> Result<()> {
    log::trace!("Vigil daemon options: {:?}", options);

    let config = VigilConfig::load(options.config_file.as_deref())?;
    let agent_config = AgentConfig::try_from(&config.get_section(AGENT_SECTION))
        .context("Invalid agent configuration")?;
    let console_config = ConsoleConfig::try_from(&config.get_section(CONSOLE_SECTION))
        .context("Invalid console configuration")?;
    let router_config = watch_router_config(config.get_watched_section(ROUTER_SECTION))?;

    let delegated = if agent_config.use_peer {
        let socket = agent_config
            .peer_socket_path
            .clone()
            .unwrap_or_else(|| peer_api::DEFAULT_UDS.to_string());
        log::info!("Escalating denied queries to the peer on {socket}");
        DelegatedSource::new(PeerClient::unix(socket).with_timeout(agent_config.peer_timeout))
    } else {
        DelegatedSource::disabled()
    };
    let extractor = MetadataExtractor::new(LocalSource::new(ProcfsReader), delegated);
    let agent = SecurityAgent::new(agent_config, extractor, router_config);
    let handle = agent.handle();

    // Standard output is reserved to the decisions sent back to the kernel source
    let console = console_config
        .enabled
        .then(|| spawn_console_sink(agent.bus(), console_config, std::io::stderr()));

    let input = open_events(options.events.as_deref()).await?;
    let (tx, rx) = agent.channel();
    let replies = Arc::new(Mutex::new(std::io::stdout()));
    let source = tokio::spawn(read_events(input, tx, replies));

    let reviewer = match options.decisions.as_deref() {
        Some(path) => {
            let path = path.to_path_buf();
            let handle = handle.clone();
            // Opening a fifo waits for its writer: don't hold the pipeline on it
            Some(tokio::spawn(async move {
                let reviewed = async {
                    let file = tokio::fs::File::open(&path).await.with_context(|| {
                        format!("Error opening decisions file {}", path.display())
                    })?;
                    read_decisions(BufReader::new(file), handle).await
                };
                match reviewed.await {
                    Ok(count) => log::info!("Reviewer input closed after {count} decisions"),
                    Err(err) => crate::cli::report_error(&err),
                }
            }))
        }
        None => {
            log::info!("No reviewer input, authorization requests are allowed on timeout");
            None
        }
    };

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sig_int.recv() => log::trace!("SIGINT received"),
            _ = sig_term.recv() => log::trace!("SIGTERM received"),
        }
    };

    log::info!("Vigil agent started");
    match agent.run(rx, shutdown).await {
        AgentExit::ConnectionLost => {
            log::error!("Kernel event source disconnected, pending requests allowed");
            match source.await {
                Ok(Ok(count)) => log::debug!("{count} kernel events read"),
                Ok(Err(err)) => crate::cli::report_error(&err),
                Err(err) => log::warn!("Event source task failed: {err}"),
            }
        }
        AgentExit::Shutdown => {
            log::info!("Terminating Vigil agent...");
            source.abort();
        }
    }

    if let Some(reviewer) = reviewer {
        reviewer.abort();
    }
    if let Some(console) = console {
        console.abort();
    }
    eprintln!("{}", counters_table(&handle.counters()));

    Ok(())
}

async fn open_events(path: Option<&Path>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match path {
        Some(path) if path != Path::new("-") => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Error opening events file {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        _ => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

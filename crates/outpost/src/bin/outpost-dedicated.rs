//! Dedicated server binary.
//!
//! Usage: `outpost-dedicated [CONFIG] [--bind ADDR] [--map NAME]`. Lines
//! typed on stdin are run as console commands. Log verbosity follows
//! `RUST_LOG` (default `info`).

use std::path::PathBuf;

use clap::Parser;
use outpost::{NullSimulation, OutpostError, OutpostServer, ServerConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Command line arguments.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON server configuration; defaults apply when omitted
    config: Option<PathBuf>,
    /// UDP address to listen on, overriding the configuration
    #[clap(short, long)]
    bind: Option<String>,
    /// Map to load at startup, overriding the configuration
    #[clap(short, long)]
    map: Option<String>,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, OutpostError> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| OutpostError::Config(format!("{}: {e}", path.display())))?;
                ServerConfig::from_json(&text)
                    .map_err(|e| OutpostError::Config(format!("{}: {e}", path.display())))?
            }
            None => ServerConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(map) = &self.map {
            config.map = map.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = args.server_config()?;
    let map = config.map.clone();

    let mut server = OutpostServer::builder()
        .config(config)
        .build(NullSimulation::default())
        .await?;
    server.core_mut().spawn_map(&map)?;

    let console = server.console_input();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if console.send(line).await.is_err() {
                break;
            }
        }
    });

    server.run().await?;
    Ok(())
}

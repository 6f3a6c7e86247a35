//! CLI entry point: loads a `.torrent` file and drives the leecher
//! engine to completion, printing progress events to stderr.
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rs_torrent_client::engine::{self, EngineConfig};

/// Downloads all pieces of a torrent from its peer swarm.
#[derive(Parser, Debug)]
#[command(name = "rstc", version, about)]
struct Cli {
    /// Path to the `.torrent` metainfo file.
    metainfo: PathBuf,

    /// Local TCP port advertised to trackers and peers.
    #[arg(short, long, default_value_t = 6841)]
    port: u16,

    /// Wall-clock budget, in seconds, for the DHT fallback sweep.
    #[arg(long, default_value_t = 5)]
    dht_timeout: u64,

    /// Directory the assembled payload is written into.
    #[arg(short, long, default_value = "tmp_torrent")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig {
        listen_port: cli.port,
        dht_timeout: Duration::from_secs(cli.dht_timeout),
        output_dir: cli.output,
    };

    let on_progress = |message: &str| tracing::info!("{message}");
    match engine::run(&cli.metainfo, &config, &on_progress).await {
        Ok(payload) => {
            tracing::info!("download complete: {} bytes", payload.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("rstc: {e}");
            ExitCode::FAILURE
        }
    }
}

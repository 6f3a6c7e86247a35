//! The orchestrator: sequences metainfo loading, tracker discovery, and
//! the piece scheduler, surfacing progress via a caller-supplied
//! callback and writing the assembled payload to disk.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;

use crate::error::{EngineError, EngineResult};
use crate::peer::PeerSession;
use crate::scheduler;
use crate::torrent::file::TorrentFile;
use crate::tracker::TrackerClient;

const DEFAULT_DHT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime knobs the CLI exposes; defaults match spec's fixed constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub listen_port: u16,
    pub dht_timeout: Duration,
    pub output_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_port: 6841,
            dht_timeout: DEFAULT_DHT_TIMEOUT,
            output_dir: PathBuf::from("tmp_torrent"),
        }
    }
}

/// Runs the full leecher pipeline for the metainfo file at `path`.
/// Returns the assembled payload on success; the output is additionally
/// written to `<output_dir>/<name>`.
#[tracing::instrument(skip(on_progress), level = "info")]
pub async fn run(
    path: &Path,
    config: &EngineConfig,
    on_progress: &(dyn Fn(&str) + Send + Sync),
) -> EngineResult<Vec<u8>> {
    on_progress(&format!("loading metainfo from {}", path.display()));
    let data = fs::read(path)?;
    let torrent = TorrentFile::parse(&data)?;
    on_progress(&format!(
        "loaded '{}', info_hash={}, {} piece(s)",
        torrent.info.name,
        torrent.info_hash_hex(),
        torrent.num_pieces()
    ));

    let tracker = TrackerClient::new(config.listen_port);
    on_progress(&format!("contacting tracker at {}", torrent.announce));
    let peer_endpoints = tracker
        .discover_peers(&torrent, config.dht_timeout)
        .await
        .map_err(|e| match e {
            crate::tracker::TrackerError::NoPeers => EngineError::NoPeers,
            crate::tracker::TrackerError::Unreachable(reason) => {
                EngineError::TrackerUnreachable(reason)
            }
        })?;
    on_progress(&format!("discovered {} peer endpoint(s)", peer_endpoints.len()));

    let sessions = connect_sessions(&peer_endpoints, torrent.info_hash, tracker.peer_id(), on_progress).await;
    if sessions.is_empty() {
        return Err(EngineError::NoPeers);
    }
    on_progress(&format!("{} peer session(s) active", sessions.len()));

    let payload = scheduler::run(&torrent, sessions, on_progress).await?;

    fs::create_dir_all(&config.output_dir)?;
    let output_path = config.output_dir.join(&torrent.info.name);
    fs::write(&output_path, &payload)?;
    on_progress(&format!("wrote {} byte(s) to {}", payload.len(), output_path.display()));

    Ok(payload)
}

/// Attempts a handshake against every discovered endpoint concurrently,
/// one task per candidate peer for the duration of session setup;
/// endpoints that fail to reach `Active` are dropped silently (per-peer
/// connect failure is non-fatal, mirroring `TrackerUnreachable`'s
/// recovery policy one layer down).
async fn connect_sessions(
    endpoints: &[String],
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    on_progress: &(dyn Fn(&str) + Send + Sync),
) -> Vec<PeerSession> {
    let attempts = endpoints.iter().map(|endpoint| async move {
        on_progress(&format!("connecting to peer {endpoint}"));
        match PeerSession::connect(endpoint, info_hash, peer_id).await {
            Ok(session) => {
                on_progress(&format!("peer {endpoint} active"));
                Some(session)
            }
            Err(e) => {
                on_progress(&format!("peer {endpoint} failed: {e}"));
                None
            }
        }
    });

    join_all(attempts).await.into_iter().flatten().collect()
}

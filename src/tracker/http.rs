//! HTTP tracker announce: compact and non-compact peer list parsing,
//! and the primary/`announce-list` fallback chain.
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{url_encode, PeerEndpoint, TrackerError};
use crate::torrent::file::TorrentFile;

const HTTP_TIMEOUT: Duration = Duration::from_secs(3);
const PING_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<PeerEndpoint>,
}

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: Peers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Peers {
    Compact(Vec<u8>),
    NonCompact(Vec<PeerDict>),
}

impl Default for Peers {
    fn default() -> Self {
        Peers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
}

/// Tries the primary `announce` URL, then each `announce-list` entry in
/// order, skipping non-HTTP(S) schemes; returns the first non-empty peer
/// set. Returns `Unreachable` only if every candidate URL failed.
pub async fn announce_chain(
    torrent: &TorrentFile,
    peer_id: [u8; 20],
    port: u16,
) -> Result<Vec<PeerEndpoint>, TrackerError> {
    let mut candidates = vec![torrent.announce.clone()];
    for group in &torrent.announce_list {
        candidates.extend(group.iter().cloned());
    }

    let mut last_error = None;
    for url in candidates {
        let scheme_ok = url.starts_with("http://") || url.starts_with("https://");
        if !scheme_ok {
            continue;
        }
        ping_host(&url).await;
        match announce(&url, torrent, peer_id, port).await {
            Ok(response) if !response.peers.is_empty() => return Ok(response.peers),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(url, error = %e, "tracker announce failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(TrackerError::Unreachable(e.to_string())),
        None => Ok(Vec::new()),
    }
}

/// Best-effort reachability probe. Never treated as the normative
/// failure signal — only used to annotate slow trackers in logs before
/// the real 3s HTTP timeout runs.
async fn ping_host(url: &str) {
    let Ok(parsed) = url::Url::parse(url) else {
        return;
    };
    let Some(host) = parsed.host_str() else {
        return;
    };
    let port = parsed.port_or_known_default().unwrap_or(80);
    let host = host.to_string();

    match timeout(PING_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_)) => {}
        _ => tracing::trace!(host, "tracker host did not respond to reachability probe"),
    }
}

#[tracing::instrument(skip(torrent), level = "debug")]
async fn announce(
    url: &str,
    torrent: &TorrentFile,
    peer_id: [u8; 20],
    port: u16,
) -> anyhow::Result<AnnounceResponse> {
    let mut parsed = url::Url::parse(url)?;
    let params = [
        ("info_hash", url_encode(&torrent.info_hash)),
        ("peer_id", url_encode(&peer_id)),
        ("port", port.to_string()),
        ("uploaded", "0".to_string()),
        ("downloaded", "0".to_string()),
        ("left", torrent.total_length().to_string()),
        ("compact", "1".to_string()),
    ];
    parsed.query_pairs_mut().extend_pairs(&params).finish();

    tracing::debug!(url = %parsed, "announcing to tracker");
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let response = client.get(parsed).send().await?;
    let body = response.bytes().await?;
    parse_announce_response(&body)
}

fn parse_announce_response(bytes: &[u8]) -> anyhow::Result<AnnounceResponse> {
    let parsed: TrackerResponse = serde_bencode::from_bytes(bytes)?;
    let peers = match parsed.peers {
        Peers::Compact(bytes) => bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                format!("{ip}:{port}")
            })
            .collect(),
        Peers::NonCompact(dicts) => dicts
            .into_iter()
            .filter_map(|dict| {
                dict.ip
                    .parse::<IpAddr>()
                    .ok()
                    .map(|ip| format!("{ip}:{}", dict.port))
            })
            .collect(),
    };

    Ok(AnnounceResponse {
        interval: parsed.interval,
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_peer_list() {
        let mut encoded = b"d8:intervali900e5:peers12:".to_vec();
        encoded.extend_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
        encoded.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe2]);
        encoded.push(b'e');

        let response = parse_announce_response(&encoded).unwrap();
        assert_eq!(response.interval, 900);
        assert_eq!(response.peers, vec!["127.0.0.1:6881", "10.0.0.1:6882"]);
    }

    #[test]
    fn parses_non_compact_peer_list() {
        let encoded =
            b"d8:intervali1800e5:peersld2:ip9:127.0.0.14:porti6881eed2:ip7:8.8.8.84:porti6882eeee";
        let response = parse_announce_response(encoded).unwrap();
        assert_eq!(response.peers, vec!["127.0.0.1:6881", "8.8.8.8:6882"]);
    }

    #[test]
    fn empty_peers_defaults_cleanly() {
        let encoded = b"d8:intervali1800ee";
        let response = parse_announce_response(encoded).unwrap();
        assert!(response.peers.is_empty());
    }
}

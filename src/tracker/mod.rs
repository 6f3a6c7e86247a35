//! Peer discovery: an HTTP tracker announce, falling back to a minimal
//! DHT `get_peers` query when no tracker yields a usable peer set.
use rand::Rng;

use crate::torrent::file::TorrentFile;

pub mod dht;
pub mod http;

pub use http::AnnounceResponse;

/// An `(IPv4, port)` pair canonicalized as `"a.b.c.d:port"`.
pub type PeerEndpoint = String;

/// Tracker errors surfaced individually per attempt; see
/// [`TrackerClient::discover_peers`] for the combined fallback semantics.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker unreachable: {0}")]
    Unreachable(String),

    #[error("no peers obtained from any source")]
    NoPeers,
}

/// Identity this client presents to trackers and DHT nodes: a fixed
/// 20-byte peer id and the local listen port advertised in announces.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    peer_id: [u8; 20],
    port: u16,
}

impl TrackerClient {
    pub fn new(port: u16) -> Self {
        Self {
            peer_id: generate_peer_id(),
            port,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Tries the HTTP announce chain first (`announce`, then each
    /// `announce-list` URL in order); if every HTTP attempt yields an
    /// empty or failing peer set, falls back to a bounded DHT
    /// `get_peers` sweep. Fails with `NoPeers` only when both paths are
    /// exhausted.
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub async fn discover_peers(
        &self,
        torrent: &TorrentFile,
        dht_timeout: std::time::Duration,
    ) -> Result<Vec<PeerEndpoint>, TrackerError> {
        match http::announce_chain(torrent, self.peer_id, self.port).await {
            Ok(peers) if !peers.is_empty() => return Ok(peers),
            Ok(_) => tracing::info!("all HTTP trackers returned an empty peer list"),
            Err(e) => tracing::warn!(error = %e, "HTTP tracker chain failed"),
        }

        tracing::info!("falling back to DHT get_peers");
        let peers = dht::find_peers(torrent.info_hash, self.port, dht_timeout).await;
        if peers.is_empty() {
            Err(TrackerError::NoPeers)
        } else {
            Ok(peers)
        }
    }
}

/// Generates this run's 20-byte peer id: an 8-byte client prefix
/// followed by 12 random bytes.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-RT1000-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    let mut rng = rand::rng();
    rng.fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// URL-encodes a byte slice per RFC 3986, leaving unreserved characters
/// (`a-z A-Z 0-9 - . _ ~`) untouched.
pub(crate) fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_carries_client_prefix() {
        let client = TrackerClient::new(6841);
        assert_eq!(&client.peer_id()[..8], b"-RT1000-");
        assert_eq!(client.peer_id().len(), 20);
    }

    #[test]
    fn url_encode_leaves_unreserved_characters_alone() {
        assert_eq!(url_encode(b"abc-._~"), "abc-._~");
    }

    #[test]
    fn url_encode_percent_escapes_everything_else() {
        assert_eq!(url_encode(&[0x00, 0xff]), "%00%FF");
    }
}

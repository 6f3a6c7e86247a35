//! A minimal DHT `get_peers` sweep (BEP 5), used when no HTTP tracker
//! yields peers. Queries bootstrap nodes with `find_node`, recursively
//! follows `nodes` responses, and collects `values` as compact peers.
use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::bencode::{decode, BencodeValue};
use crate::tracker::PeerEndpoint;

const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_RECURSION_DEPTH: u32 = 4;

fn random_node_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    rand::rng().fill(&mut id);
    id
}

fn encode_query(transaction_id: &str, method: &str, args: Vec<(&str, BencodeValue)>) -> Vec<u8> {
    use std::collections::HashMap;
    let mut arg_dict = HashMap::new();
    for (key, value) in args {
        arg_dict.insert(key.as_bytes().to_vec(), value);
    }

    let mut message = HashMap::new();
    message.insert(b"t".to_vec(), BencodeValue::String(transaction_id.as_bytes().to_vec()));
    message.insert(b"y".to_vec(), BencodeValue::String(b"q".to_vec()));
    message.insert(b"q".to_vec(), BencodeValue::String(method.as_bytes().to_vec()));
    message.insert(b"a".to_vec(), BencodeValue::Dict(arg_dict));

    crate::bencode::encode_to_vec(&BencodeValue::Dict(message))
        .expect("KRPC query dict always encodes")
}

fn find_node_query(transaction_id: &str, id: [u8; 20], target: [u8; 20]) -> Vec<u8> {
    encode_query(
        transaction_id,
        "find_node",
        vec![
            ("id", BencodeValue::String(id.to_vec())),
            ("target", BencodeValue::String(target.to_vec())),
        ],
    )
}

fn get_peers_query(transaction_id: &str, id: [u8; 20], info_hash: [u8; 20]) -> Vec<u8> {
    encode_query(
        transaction_id,
        "get_peers",
        vec![
            ("id", BencodeValue::String(id.to_vec())),
            ("info_hash", BencodeValue::String(info_hash.to_vec())),
        ],
    )
}

/// A node referenced by a `find_node`/`get_peers` response: 20-byte id,
/// 4-byte IPv4 address, 2-byte big-endian port (26 bytes total, packed).
struct CompactNode {
    addr: PeerEndpoint,
}

fn parse_compact_nodes(bytes: &[u8]) -> Vec<CompactNode> {
    bytes
        .chunks_exact(26)
        .map(|chunk| {
            let ip = std::net::Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
            let port = u16::from_be_bytes([chunk[24], chunk[25]]);
            CompactNode {
                addr: format!("{ip}:{port}"),
            }
        })
        .collect()
}

fn parse_compact_peers(bytes: &[u8]) -> Vec<PeerEndpoint> {
    bytes
        .chunks_exact(6)
        .filter_map(|chunk| {
            let ip = std::net::Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            (port > 1024).then(|| format!("{ip}:{port}"))
        })
        .collect()
}

struct KrpcResponse {
    values: Vec<PeerEndpoint>,
    nodes: Vec<CompactNode>,
}

fn parse_response(bytes: &[u8]) -> Option<KrpcResponse> {
    let value = decode(bytes).ok()?;
    let dict = value.as_dict()?;
    let r = dict.get(b"r".as_slice())?.as_dict()?;

    let values = r
        .get(b"values".as_slice())
        .and_then(BencodeValue::as_list)
        .map(|list| {
            list.iter()
                .filter_map(BencodeValue::as_str_bytes)
                .flat_map(|bytes| parse_compact_peers(bytes))
                .collect()
        })
        .unwrap_or_default();

    let nodes = r
        .get(b"nodes".as_slice())
        .and_then(BencodeValue::as_str_bytes)
        .map(parse_compact_nodes)
        .unwrap_or_default();

    Some(KrpcResponse { values, nodes })
}

/// Binds a UDP socket on `listen_port` and runs a time-bounded
/// `find_node`/`get_peers` sweep starting from the bootstrap nodes.
/// Returns whatever peers were collected by the deadline; an empty
/// result is not an error at this layer, it becomes `NoPeers` one level
/// up when combined with a failed HTTP chain.
#[tracing::instrument(skip(info_hash), level = "debug")]
pub async fn find_peers(
    info_hash: [u8; 20],
    listen_port: u16,
    wall_clock_budget: Duration,
) -> Vec<PeerEndpoint> {
    let Ok(socket) = UdpSocket::bind(("0.0.0.0", listen_port)).await else {
        tracing::warn!(listen_port, "failed to bind DHT UDP socket");
        return Vec::new();
    };

    let node_id = random_node_id();
    let deadline = Instant::now() + wall_clock_budget;
    let mut transaction_counter: u32 = 0;
    let mut next_transaction_id = || {
        transaction_counter += 1;
        transaction_counter.to_string()
    };

    let mut visited: HashSet<String> = HashSet::new();
    let mut pending: Vec<(String, u32)> = BOOTSTRAP_NODES.iter().map(|n| (n.to_string(), 0)).collect();
    let mut peers: HashSet<PeerEndpoint> = HashSet::new();

    while let Some((addr, depth)) = pending.pop() {
        if Instant::now() >= deadline {
            break;
        }
        if !visited.insert(addr.clone()) {
            continue;
        }

        let query = if depth == 0 {
            find_node_query(&next_transaction_id(), node_id, node_id)
        } else {
            get_peers_query(&next_transaction_id(), node_id, info_hash)
        };

        if socket.send_to(&query, &addr).await.is_err() {
            continue;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let mut buf = [0u8; 2048];
        let Ok(Ok((len, _))) = timeout(remaining.min(RECV_TIMEOUT), socket.recv_from(&mut buf)).await
        else {
            continue;
        };

        let Some(response) = parse_response(&buf[..len]) else {
            continue;
        };

        for peer in response.values {
            peers.insert(peer);
        }

        if depth < MAX_RECURSION_DEPTH {
            for node in response.nodes {
                // Always issue get_peers against newly discovered nodes.
                pending.push((node.addr, depth + 1));
            }
        }
    }

    peers.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_node_query_encodes_krpc_shape() {
        let id = [1u8; 20];
        let target = [2u8; 20];
        let bytes = find_node_query("1", id, target);
        let decoded = decode(&bytes).unwrap();
        let dict = decoded.as_dict().unwrap();
        assert_eq!(dict.get(b"y".as_slice()).unwrap().as_str_bytes(), Some(b"q".as_slice()));
        assert_eq!(dict.get(b"q".as_slice()).unwrap().as_str_bytes(), Some(b"find_node".as_slice()));
        let args = dict.get(b"a".as_slice()).unwrap().as_dict().unwrap();
        assert_eq!(args.get(b"id".as_slice()).unwrap().as_str_bytes(), Some(id.as_slice()));
        assert_eq!(args.get(b"target".as_slice()).unwrap().as_str_bytes(), Some(target.as_slice()));
    }

    #[test]
    fn compact_peers_filters_low_ports() {
        let mut bytes = vec![127, 0, 0, 1];
        bytes.extend_from_slice(&500u16.to_be_bytes()); // <= 1024, filtered
        bytes.extend_from_slice(&[10, 0, 0, 1]);
        bytes.extend_from_slice(&6881u16.to_be_bytes());

        let peers = parse_compact_peers(&bytes);
        assert_eq!(peers, vec!["10.0.0.1:6881".to_string()]);
    }

    #[test]
    fn parses_values_response() {
        let mut payload = vec![127, 0, 0, 1];
        payload.extend_from_slice(&6881u16.to_be_bytes());

        let mut r = std::collections::HashMap::new();
        r.insert(b"values".to_vec(), BencodeValue::List(vec![BencodeValue::String(payload)]));
        let mut outer = std::collections::HashMap::new();
        outer.insert(b"r".to_vec(), BencodeValue::Dict(r));
        let bytes = crate::bencode::encode_to_vec(&BencodeValue::Dict(outer)).unwrap();

        let response = parse_response(&bytes).unwrap();
        assert_eq!(response.values, vec!["127.0.0.1:6881".to_string()]);
    }
}

//! End-to-end scenarios from the piece scheduler's perspective: a fake
//! peer or two stand in for the network, driven over real loopback
//! sockets via `PeerSession::connect`.
mod common;

use std::collections::HashMap;
use std::collections::HashMap as Map;

use common::{spawn_dropping_peer, spawn_serving_peer};
use rs_torrent_client::bencode::{encode_to_vec, BencodeValue};
use rs_torrent_client::error::EngineError;
use rs_torrent_client::hash;
use rs_torrent_client::peer::PeerSession;
use rs_torrent_client::scheduler;
use rs_torrent_client::torrent::file::TorrentFile;

fn single_file_torrent(piece_length: i64, file_length: i64, pieces: &[u8]) -> Vec<u8> {
    let mut info = Map::new();
    info.insert(b"name".to_vec(), BencodeValue::String(b"out.bin".to_vec()));
    info.insert(b"piece length".to_vec(), BencodeValue::Integer(piece_length));
    info.insert(b"length".to_vec(), BencodeValue::Integer(file_length));
    info.insert(b"pieces".to_vec(), BencodeValue::String(pieces.to_vec()));

    let mut root = Map::new();
    root.insert(
        b"announce".to_vec(),
        BencodeValue::String(b"http://tracker.example/announce".to_vec()),
    );
    root.insert(b"info".to_vec(), BencodeValue::Dict(info));
    encode_to_vec(&BencodeValue::Dict(root)).unwrap()
}

const INFO_HASH: [u8; 20] = [0x42; 20];
const PEER_ID: [u8; 20] = [0x99; 20];

fn noop_progress(_: &str) {}

#[tokio::test]
async fn single_piece_single_file_downloads_successfully() {
    let data = single_file_torrent(32768, 5, &hash::sha1(b"hello"));
    let mut torrent = TorrentFile::parse(&data).unwrap();
    torrent.info_hash = INFO_HASH;

    let mut pieces = HashMap::new();
    pieces.insert(0, b"hello".to_vec());
    let peer = spawn_serving_peer(INFO_HASH, &[0], pieces).await;

    let session = PeerSession::connect(&peer.addr, INFO_HASH, PEER_ID)
        .await
        .unwrap();

    let payload = scheduler::run(&torrent, vec![session], &noop_progress)
        .await
        .unwrap();
    assert_eq!(payload, b"hello");
}

#[tokio::test]
async fn two_piece_file_has_short_final_piece() {
    let first = b"0123456789012345".to_vec(); // 16 bytes
    let second = b"short".to_vec(); // 5 bytes, final piece = 21 - 16
    let mut digest = Vec::new();
    digest.extend_from_slice(&hash::sha1(&first));
    digest.extend_from_slice(&hash::sha1(&second));

    let data = single_file_torrent(16, 21, &digest);
    let mut torrent = TorrentFile::parse(&data).unwrap();
    torrent.info_hash = INFO_HASH;
    assert_eq!(torrent.piece_size(1), 5);

    let mut pieces = HashMap::new();
    pieces.insert(0, first);
    pieces.insert(1, second);
    let peer = spawn_serving_peer(INFO_HASH, &[0, 1], pieces).await;

    let session = PeerSession::connect(&peer.addr, INFO_HASH, PEER_ID)
        .await
        .unwrap();

    let payload = scheduler::run(&torrent, vec![session], &noop_progress)
        .await
        .unwrap();
    assert_eq!(payload.len(), 21);
    assert_eq!(&payload[16..], b"short");
}

#[tokio::test]
async fn peer_failing_mid_piece_is_reassigned_to_another_peer() {
    let data = single_file_torrent(32768, 5, &hash::sha1(b"hello"));
    let mut torrent = TorrentFile::parse(&data).unwrap();
    torrent.info_hash = INFO_HASH;

    let mut flaky_pieces = HashMap::new();
    flaky_pieces.insert(0, b"hello".to_vec());
    // Drops the connection before serving any block of piece 0.
    let flaky_peer = spawn_dropping_peer(INFO_HASH, &[0], flaky_pieces, 0).await;

    let mut healthy_pieces = HashMap::new();
    healthy_pieces.insert(0, b"hello".to_vec());
    let healthy_peer = spawn_serving_peer(INFO_HASH, &[0], healthy_pieces).await;

    let flaky_session = PeerSession::connect(&flaky_peer.addr, INFO_HASH, PEER_ID)
        .await
        .unwrap();
    let healthy_session = PeerSession::connect(&healthy_peer.addr, INFO_HASH, PEER_ID)
        .await
        .unwrap();

    let payload = scheduler::run(
        &torrent,
        vec![flaky_session, healthy_session],
        &noop_progress,
    )
    .await
    .unwrap();
    assert_eq!(payload, b"hello");
}

#[tokio::test]
async fn hash_mismatch_fails_without_writing_output() {
    let data = single_file_torrent(32768, 5, &hash::sha1(b"hello"));
    let mut torrent = TorrentFile::parse(&data).unwrap();
    torrent.info_hash = INFO_HASH;

    let mut pieces = HashMap::new();
    pieces.insert(0, b"wrong".to_vec()); // wrong content, same length
    let peer = spawn_serving_peer(INFO_HASH, &[0], pieces).await;

    let session = PeerSession::connect(&peer.addr, INFO_HASH, PEER_ID)
        .await
        .unwrap();

    let err = scheduler::run(&torrent, vec![session], &noop_progress)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::HashMismatch { index: 0 }));
}

#[tokio::test]
async fn bitfield_filtering_assigns_each_piece_to_the_peer_that_has_it() {
    let digest_a = hash::sha1(b"AAAAA");
    let digest_b = hash::sha1(b"BBBBB");
    let mut digests = Vec::new();
    digests.extend_from_slice(&digest_a);
    digests.extend_from_slice(&digest_b);

    let data = single_file_torrent(5, 10, &digests);
    let mut torrent = TorrentFile::parse(&data).unwrap();
    torrent.info_hash = INFO_HASH;

    let mut only_piece_0 = HashMap::new();
    only_piece_0.insert(0, b"AAAAA".to_vec());
    let peer_a = spawn_serving_peer(INFO_HASH, &[0], only_piece_0).await;

    let mut only_piece_1 = HashMap::new();
    only_piece_1.insert(1, b"BBBBB".to_vec());
    let peer_b = spawn_serving_peer(INFO_HASH, &[1], only_piece_1).await;

    let session_a = PeerSession::connect(&peer_a.addr, INFO_HASH, PEER_ID)
        .await
        .unwrap();
    let session_b = PeerSession::connect(&peer_b.addr, INFO_HASH, PEER_ID)
        .await
        .unwrap();

    let payload = scheduler::run(&torrent, vec![session_a, session_b], &noop_progress)
        .await
        .unwrap();
    assert_eq!(payload, b"AAAAABBBBB");
}

//! A minimal fake BitTorrent peer used by the integration tests below.
//! Speaks just enough of the wire protocol to drive `PeerSession`
//! through its full state machine: handshake, bitfield, interested,
//! unchoke, then serves `request`s from a fixed piece map.
use std::collections::HashMap;

use rs_torrent_client::peer::message::{read_message, write_message, Bitfield, Message};
use rs_torrent_client::peer::Handshake;
use tokio::net::{TcpListener, TcpStream};

pub struct FakePeer {
    pub addr: String,
}

/// Piece contents keyed by piece index, served verbatim to whatever
/// block ranges the test peer requests.
pub type PieceMap = HashMap<u32, Vec<u8>>;

/// Spawns a fake peer that serves every piece in `pieces` and then
/// keeps the connection open until the test drops it.
pub async fn spawn_serving_peer(info_hash: [u8; 20], has_pieces: &[usize], pieces: PieceMap) -> FakePeer {
    spawn_with_behavior(info_hash, has_pieces, pieces, FailureMode::None).await
}

/// Spawns a fake peer that drops the connection after serving exactly
/// `blocks_before_drop` blocks of the requested piece.
pub async fn spawn_dropping_peer(
    info_hash: [u8; 20],
    has_pieces: &[usize],
    pieces: PieceMap,
    blocks_before_drop: usize,
) -> FakePeer {
    spawn_with_behavior(
        info_hash,
        has_pieces,
        pieces,
        FailureMode::DropAfter(blocks_before_drop),
    )
    .await
}

#[derive(Clone, Copy)]
enum FailureMode {
    None,
    DropAfter(usize),
}

async fn spawn_with_behavior(
    info_hash: [u8; 20],
    has_pieces: &[usize],
    pieces: PieceMap,
    failure: FailureMode,
) -> FakePeer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let mut bitfield = Bitfield::empty(0);
    for &index in has_pieces {
        bitfield.set_piece(index);
    }

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        if serve(&mut socket, info_hash, bitfield, &pieces, failure)
            .await
            .is_err()
        {
            // Test drives the assertion; a dropped connection here is
            // often the intended behavior (FailureMode::DropAfter).
        }
    });

    FakePeer { addr }
}

async fn serve(
    socket: &mut TcpStream,
    info_hash: [u8; 20],
    bitfield: Bitfield,
    pieces: &PieceMap,
    failure: FailureMode,
) -> std::io::Result<()> {
    let theirs = Handshake::read(socket).await?;
    theirs.validate(info_hash)?;
    let ours = Handshake::new(info_hash, [0xAB; 20]);
    Handshake::write(socket, &ours).await?;

    write_message(socket, &Message::Bitfield(bitfield)).await?;

    loop {
        match read_message(socket).await? {
            Some(Message::Interested) => break,
            Some(_) => continue,
            None => return Ok(()),
        }
    }
    write_message(socket, &Message::Unchoke).await?;

    let mut blocks_served = 0usize;
    loop {
        let request = match read_message(socket).await? {
            Some(Message::Request { index, begin, length }) => (index, begin, length),
            Some(_) => continue,
            None => return Ok(()),
        };

        if let FailureMode::DropAfter(limit) = failure {
            if blocks_served >= limit {
                return Ok(());
            }
        }

        let (index, begin, length) = request;
        let piece = pieces.get(&index).cloned().unwrap_or_default();
        let start = begin as usize;
        let end = (start + length as usize).min(piece.len());
        let block = piece[start..end].to_vec();

        write_message(
            socket,
            &Message::Piece {
                index,
                begin,
                block,
            },
        )
        .await?;
        blocks_served += 1;
    }
}

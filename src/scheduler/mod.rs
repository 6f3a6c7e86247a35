//! The piece scheduler: drives a pool of active peer sessions against a
//! pending-piece FIFO, retrying failures on other sessions until the
//! FIFO drains, then verifies and concatenates the result.
use std::collections::{HashMap, VecDeque};

use futures::future::join_all;

use crate::error::EngineError;
use crate::hash;
use crate::peer::PeerSession;
use crate::torrent::file::TorrentFile;

/// Drains `pending` across `sessions`, one piece in flight per session
/// per pass, until every index is `Done` or the scheduler gives up with
/// `NoProgress`. On success, verifies SHA-1 of every piece against the
/// descriptor and concatenates them in ascending index order.
#[tracing::instrument(skip(sessions, torrent, on_progress), level = "debug")]
pub async fn run(
    torrent: &TorrentFile,
    mut sessions: Vec<PeerSession>,
    on_progress: &(dyn Fn(&str) + Send + Sync),
) -> Result<Vec<u8>, EngineError> {
    let num_pieces = torrent.num_pieces();
    let mut pending: VecDeque<usize> = (0..num_pieces).collect();
    let mut completed: HashMap<usize, Vec<u8>> = HashMap::new();

    while !pending.is_empty() {
        sessions.retain(|s| !s.is_dead());
        if sessions.is_empty() {
            return Err(EngineError::NoProgress {
                pending: pending.len(),
            });
        }

        let assignments = assign_pass(&sessions, &pending);
        if assignments.is_empty() {
            return Err(EngineError::NoProgress {
                pending: pending.len(),
            });
        }
        for &(_, piece_index) in &assignments {
            pending.retain(|index| *index != piece_index);
        }

        let mut remaining_sessions: Vec<Option<PeerSession>> =
            sessions.drain(..).map(Some).collect();

        let mut indices_in_flight: Vec<usize> = assignments.iter().map(|(i, _)| *i).collect();
        indices_in_flight.sort_unstable();
        let mut taken: Vec<(usize, PeerSession)> = Vec::with_capacity(assignments.len());
        for &session_idx in &indices_in_flight {
            let session = remaining_sessions[session_idx]
                .take()
                .expect("each session index is assigned at most once per pass");
            taken.push((session_idx, session));
        }

        let piece_lengths: HashMap<usize, u64> = assignments
            .iter()
            .map(|&(session_idx, piece_index)| (session_idx, torrent.piece_size(piece_index) as u64))
            .collect();
        let piece_for_session: HashMap<usize, usize> = assignments.into_iter().collect();

        let futures = taken.into_iter().map(|(session_idx, mut session)| {
            let piece_index = piece_for_session[&session_idx];
            let piece_length = piece_lengths[&session_idx];
            async move {
                let result = session.download_piece(piece_index, piece_length).await;
                (session_idx, piece_index, session, result)
            }
        });

        let results = join_all(futures).await;
        for (session_idx, piece_index, mut session, result) in results {
            match result {
                Ok(bytes) => {
                    on_progress(&format!("piece {piece_index} downloaded"));
                    completed.insert(piece_index, bytes);
                }
                Err(e) => {
                    on_progress(&format!("piece {piece_index} failed: {e}"));
                    session.record_failure();
                    pending.push_back(piece_index);
                }
            }
            remaining_sessions[session_idx] = Some(session);
        }

        sessions = remaining_sessions.into_iter().flatten().collect();
    }

    verify_and_concatenate(torrent, completed)
}

/// For each session, in order, assigns the first pending index its
/// bitfield advertises that no other session in this pass has already
/// claimed. At most one piece per session per pass.
fn assign_pass(sessions: &[PeerSession], pending: &VecDeque<usize>) -> Vec<(usize, usize)> {
    let mut assignments = Vec::new();
    let mut claimed: Vec<usize> = Vec::new();
    for (session_idx, session) in sessions.iter().enumerate() {
        if let Some(&piece_index) = pending
            .iter()
            .find(|index| session.has_piece(**index) && !claimed.contains(index))
        {
            claimed.push(piece_index);
            assignments.push((session_idx, piece_index));
        }
    }
    assignments
}

fn verify_and_concatenate(
    torrent: &TorrentFile,
    completed: HashMap<usize, Vec<u8>>,
) -> Result<Vec<u8>, EngineError> {
    let num_pieces = torrent.num_pieces();
    if completed.len() != num_pieces {
        return Err(EngineError::CountMismatch {
            expected: num_pieces,
            actual: completed.len(),
        });
    }

    let mut payload = Vec::with_capacity(torrent.total_length() as usize);
    for index in 0..num_pieces {
        let bytes = completed
            .get(&index)
            .expect("completed length already checked against num_pieces");
        let digest = hash::sha1(bytes);
        let expected = torrent.info.pieces[index];
        if digest != expected {
            return Err(EngineError::HashMismatch { index });
        }
        payload.extend_from_slice(bytes);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_and_concatenate_detects_count_mismatch() {
        let data = crate::torrent::file::TorrentFile::parse(&test_torrent_bytes()).unwrap();
        let err = verify_and_concatenate(&data, HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::CountMismatch { expected: 1, actual: 0 }));
    }

    #[test]
    fn verify_and_concatenate_detects_hash_mismatch() {
        let data = crate::torrent::file::TorrentFile::parse(&test_torrent_bytes()).unwrap();
        let mut completed = HashMap::new();
        completed.insert(0, b"wrong".to_vec());
        let err = verify_and_concatenate(&data, completed).unwrap_err();
        assert!(matches!(err, EngineError::HashMismatch { index: 0 }));
    }

    #[test]
    fn verify_and_concatenate_succeeds_on_matching_digest() {
        let data = crate::torrent::file::TorrentFile::parse(&test_torrent_bytes()).unwrap();
        let mut completed = HashMap::new();
        completed.insert(0, b"hello".to_vec());
        let payload = verify_and_concatenate(&data, completed).unwrap();
        assert_eq!(payload, b"hello");
    }

    fn test_torrent_bytes() -> Vec<u8> {
        use crate::bencode::{encode_to_vec, BencodeValue};
        use std::collections::HashMap as Map;

        let digest = hash::sha1(b"hello");
        let mut info = Map::new();
        info.insert(b"name".to_vec(), BencodeValue::String(b"hello.txt".to_vec()));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(32768));
        info.insert(b"length".to_vec(), BencodeValue::Integer(5));
        info.insert(b"pieces".to_vec(), BencodeValue::String(digest.to_vec()));

        let mut root = Map::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://tracker.example/announce".to_vec()),
        );
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));
        encode_to_vec(&BencodeValue::Dict(root)).unwrap()
    }
}

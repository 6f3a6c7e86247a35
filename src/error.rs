//! The engine's top-level error type. Every error kind the core can
//! surface to a caller is represented here, each carrying the offending
//! identifier (piece index, field name, or endpoint) per the core's
//! error design.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed bencode at offset {offset}")]
    MalformedBencode { offset: usize },

    #[error("invalid metainfo field '{field}': {reason}")]
    InvalidMetainfo { field: String, reason: String },

    #[error("tracker unreachable: {0}")]
    TrackerUnreachable(String),

    #[error("no peers obtained from any source")]
    NoPeers,

    #[error("handshake with {endpoint} rejected: {reason}")]
    HandshakeRejected { endpoint: String, reason: String },

    #[error("piece {index} failed: {reason}")]
    PieceFailed { index: usize, reason: String },

    #[error("hash mismatch for piece {index}")]
    HashMismatch { index: usize },

    #[error("piece count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("no progress: no peer sessions remain with {pending} piece(s) outstanding")]
    NoProgress { pending: usize },

    #[error("I/O error: {0}")]
    IOFailure(#[from] std::io::Error),
}

impl From<crate::bencode::BencodeError> for EngineError {
    fn from(err: crate::bencode::BencodeError) -> Self {
        match err {
            crate::bencode::BencodeError::MalformedBencode { offset, .. } => {
                EngineError::MalformedBencode { offset }
            }
            other => EngineError::IOFailure(std::io::Error::other(other.to_string())),
        }
    }
}

impl From<crate::torrent::TorrentError> for EngineError {
    fn from(err: crate::torrent::TorrentError) -> Self {
        match err {
            crate::torrent::TorrentError::InvalidMetainfo { field, reason } => {
                EngineError::InvalidMetainfo { field, reason }
            }
            crate::torrent::TorrentError::Bencode(b) => b.into(),
            crate::torrent::TorrentError::Io(e) => EngineError::IOFailure(e),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

//! Metainfo loading: parses a `.torrent` file into a typed descriptor and
//! computes its info-hash.
use thiserror::Error;

pub mod file;

/// Errors raised while loading a metainfo file.
///
/// `InvalidMetainfo` carries the offending field name and a human-readable
/// reason, per the core's error design (spec: missing required keys, or a
/// `pieces` length not divisible by 20).
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid metainfo field '{field}': {reason}")]
    InvalidMetainfo { field: String, reason: String },
}

impl TorrentError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TorrentError::InvalidMetainfo {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for torrent operations.
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;

//! Bencode codec: the self-describing binary format used by torrent
//! metainfo files and tracker/DHT wire replies.
//!
//! Bencode has four value kinds: signed integers (`i<n>e`), byte strings
//! (`<len>:<bytes>`), ordered lists (`l...e`) and dictionaries with keys
//! sorted ascending as raw bytes (`d<key><val>...e`). Byte strings are not
//! guaranteed to be UTF-8, so they are kept as raw `Vec<u8>` throughout.
use std::collections::HashMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, decode_root_with_spans, SpannedDict};
pub use encoder::{encode, encode_to_vec};

/// A decoded Bencode value.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_dict(&self) -> Option<&HashMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }
}

/// Errors produced while decoding or encoding bencode.
///
/// `MalformedBencode` carries the byte offset of the deviation, per the
/// core's error design: every parse failure must be attributable to a
/// position in the source bytes.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("malformed bencode at offset {offset}: {reason}")]
    MalformedBencode { offset: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot encode type: {0}")]
    CannotEncodeType(&'static str),
}

impl BencodeError {
    pub fn offset(&self) -> Option<usize> {
        match self {
            BencodeError::MalformedBencode { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

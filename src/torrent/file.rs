//! The `TorrentFile` descriptor: the result of bdecoding a `.torrent`
//! file and computing its info-hash.
use super::{TorrentError, TorrentResult};
use crate::bencode::decoder::decode_root_with_spans;
use crate::bencode::BencodeValue;
use crate::hash;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::instrument;

/// A parsed `.torrent` metainfo descriptor.
#[derive(Debug, PartialEq, Clone)]
pub struct TorrentFile {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub creation_date: Option<SystemTime>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
    pub url_list: Vec<String>,
    pub info: InfoDict,
    /// SHA-1 of the exact source byte span of the bencoded `info` dict.
    pub info_hash: [u8; 20],
}

impl TorrentFile {
    pub fn info_hash_hex(&self) -> String {
        hash::to_hex(&self.info_hash)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<[u8; 20]>,
    pub files: Vec<FileDict>,
    pub is_multi_file: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FileDict {
    pub length: i64,
    pub path: Vec<String>,
}

/// Splits the concatenated `pieces` byte string into 20-byte SHA-1
/// digests, one per piece index in order.
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::invalid(
            "pieces",
            format!("length {} is not a multiple of 20", pieces_bytes.len()),
        ));
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn require_string(dict: &HashMap<Vec<u8>, BencodeValue>, field: &str) -> TorrentResult<String> {
    match dict.get(field.as_bytes()) {
        Some(BencodeValue::String(s)) => String::from_utf8(s.clone())
            .map_err(|e| TorrentError::invalid(field, format!("not valid UTF-8: {e}"))),
        _ => Err(TorrentError::invalid(field, "missing or not a string")),
    }
}

fn optional_string(dict: &HashMap<Vec<u8>, BencodeValue>, field: &str) -> String {
    match dict.get(field.as_bytes()) {
        Some(BencodeValue::String(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => String::new(),
    }
}

fn require_integer(dict: &HashMap<Vec<u8>, BencodeValue>, field: &str) -> TorrentResult<i64> {
    match dict.get(field.as_bytes()) {
        Some(BencodeValue::Integer(i)) => Ok(*i),
        _ => Err(TorrentError::invalid(field, "missing or not an integer")),
    }
}

fn parse_path_component_list(value: &BencodeValue, field: &str) -> TorrentResult<Vec<String>> {
    let list = value
        .as_list()
        .ok_or_else(|| TorrentError::invalid(field, "not a list"))?;
    list.iter()
        .map(|component| {
            component
                .as_str_bytes()
                .ok_or_else(|| TorrentError::invalid(field, "path component is not a string"))
                .and_then(|bytes| {
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| TorrentError::invalid(field, format!("not valid UTF-8: {e}")))
                })
        })
        .collect()
}

fn parse_files(dict: &HashMap<Vec<u8>, BencodeValue>, name: &str) -> TorrentResult<(Vec<FileDict>, bool)> {
    match dict.get(b"files".as_slice()) {
        Some(BencodeValue::List(entries)) => {
            let mut files = Vec::with_capacity(entries.len());
            for entry in entries {
                let entry_dict = entry
                    .as_dict()
                    .ok_or_else(|| TorrentError::invalid("files", "entry is not a dictionary"))?;
                let length = require_integer(entry_dict, "length")?;
                let path = entry_dict
                    .get(b"path".as_slice())
                    .ok_or_else(|| TorrentError::invalid("files", "entry missing 'path'"))
                    .and_then(|v| parse_path_component_list(v, "files.path"))?;
                files.push(FileDict { length, path });
            }
            Ok((files, true))
        }
        _ => {
            // Single-file torrent: synthesize one file entry whose path is
            // the info name and whose length is the info `length` field.
            let length = require_integer(dict, "length")?;
            Ok((
                vec![FileDict {
                    length,
                    path: vec![name.to_string()],
                }],
                false,
            ))
        }
    }
}

fn parse_announce_list(value: &BencodeValue) -> TorrentResult<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| TorrentError::invalid("announce-list", "not a list"))?;
    tiers
        .iter()
        .map(|tier| parse_path_component_list(tier, "announce-list tier"))
        .collect()
}

fn parse_url_list(value: &BencodeValue) -> TorrentResult<Vec<String>> {
    match value {
        BencodeValue::List(_) => parse_path_component_list(value, "url-list"),
        BencodeValue::String(s) => Ok(vec![String::from_utf8_lossy(s).into_owned()]),
        _ => Err(TorrentError::invalid("url-list", "neither a string nor a list")),
    }
}

impl TorrentFile {
    /// Total length, in bytes, of all files in the torrent.
    pub fn total_length(&self) -> i64 {
        self.info.files.iter().map(|f| f.length).sum()
    }

    pub fn num_pieces(&self) -> usize {
        self.info.pieces.len()
    }

    /// Size of piece `index`; the final piece may be shorter than
    /// `piece_length` when `total_length % piece_length != 0`.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            self.total_length() - (self.num_pieces() - 1) as i64 * self.info.piece_length
        }
    }

    pub fn piece_hash_hex(&self, index: usize) -> Option<String> {
        self.info.pieces.get(index).map(hash::to_hex)
    }

    /// Parses a `.torrent` file's raw bytes into a `TorrentFile`.
    #[instrument(skip(data), level = "debug")]
    pub fn parse(data: &[u8]) -> TorrentResult<TorrentFile> {
        let root = decode_root_with_spans(data)?;

        let announce = require_string(&root.value, "announce")?;

        let info_value = root
            .value
            .get(b"info".as_slice())
            .ok_or_else(|| TorrentError::invalid("info", "missing"))?;
        let info_dict = info_value
            .as_dict()
            .ok_or_else(|| TorrentError::invalid("info", "not a dictionary"))?;

        let name = require_string(info_dict, "name")?;
        let piece_length = require_integer(info_dict, "piece length")?;
        let pieces_bytes = match info_dict.get(b"pieces".as_slice()) {
            Some(BencodeValue::String(s)) => s.clone(),
            _ => return Err(TorrentError::invalid("pieces", "missing or not a string")),
        };
        let pieces = parse_pieces(&pieces_bytes)?;
        let (files, is_multi_file) = parse_files(info_dict, &name)?;

        let announce_list = match root.value.get(b"announce-list".as_slice()) {
            Some(v) => parse_announce_list(v)?,
            None => Vec::new(),
        };

        let url_list = match root.value.get(b"url-list".as_slice()) {
            Some(v) => parse_url_list(v)?,
            None => Vec::new(),
        };

        let creation_date = match root.value.get(b"creation date".as_slice()) {
            Some(BencodeValue::Integer(timestamp)) => {
                let secs: u64 = (*timestamp)
                    .try_into()
                    .map_err(|_| TorrentError::invalid("creation date", "negative timestamp"))?;
                Some(UNIX_EPOCH + std::time::Duration::from_secs(secs))
            }
            Some(_) => return Err(TorrentError::invalid("creation date", "not an integer")),
            None => None,
        };

        let comment = optional_string(&root.value, "comment");
        let created_by = optional_string(&root.value, "created by");
        let encoding = optional_string(&root.value, "encoding");

        let (info_start, info_end) = root.spans[b"info".as_slice()];
        let info_hash = hash::sha1(&data[info_start..info_end]);

        Ok(TorrentFile {
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
            encoding,
            url_list,
            info: InfoDict {
                name,
                piece_length,
                pieces,
                files,
                is_multi_file,
            },
            info_hash,
        })
    }
}

//! SHA-1 helpers shared by the metainfo loader (info-hash) and the piece
//! scheduler (per-piece verification).
use sha1::{Digest, Sha1};

pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn to_hex(bytes: &[u8; 20]) -> String {
    hex::encode(bytes)
}

//! The BitTorrent peer handshake: the first message exchanged between
//! two peers. It verifies that both peers are participating in the same
//! torrent (via info_hash) and establishes basic protocol compatibility.
//!
//! The handshake is a fixed 68-byte frame: `0x13`, the 19 ASCII bytes
//! `"BitTorrent protocol"`, 8 reserved zero bytes, 20-byte info-hash,
//! 20-byte peer id.
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

pub const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes the handshake into its 68-byte wire form.
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL_ID);
        // buf[20..28] stays zeroed: reserved bytes.
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    #[instrument(level = "trace", skip(stream))]
    pub async fn write(stream: &mut TcpStream, handshake: &Handshake) -> io::Result<()> {
        stream.write_all(&handshake.serialize()).await
    }

    /// Reads and validates a 68-byte handshake frame from the peer.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> io::Result<Handshake> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;

        if buf[0] != 19 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid protocol length: {}", buf[0]),
            ));
        }
        if &buf[1..20] != PROTOCOL_ID {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid protocol identifier",
            ));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Handshake { info_hash, peer_id })
    }

    /// Validates this handshake's info hash against the expected value.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> io::Result<()> {
        if self.info_hash != expected_info_hash {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "info hash mismatch",
            ));
        }
        Ok(())
    }
}

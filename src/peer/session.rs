//! A single peer connection driven through its handshake, bitfield
//! exchange, and interest negotiation, then used to pull individual
//! pieces one block at a time.
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::EngineError;
use crate::peer::handshake::Handshake;
use crate::peer::message::{read_message, write_message, Bitfield, Message, BLOCK_SIZE};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const BITFIELD_TIMEOUT: Duration = Duration::from_secs(10);
const UNCHOKE_TIMEOUT: Duration = Duration::from_secs(10);
const BLOCK_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of consecutive piece failures a session tolerates before the
/// scheduler gives up on it.
pub const FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HandshakeSent,
    BitfieldAwait,
    InterestedSent,
    Active,
    Dead,
}

pub struct PeerSession {
    pub endpoint: String,
    stream: TcpStream,
    bitfield: Bitfield,
    state: SessionState,
    failures: u32,
}

impl PeerSession {
    /// Drives a fresh TCP connection through handshake, bitfield receipt,
    /// and the interested/unchoke exchange. Any failure at any stage maps
    /// to `HandshakeRejected` and the connection is dropped.
    #[instrument(level = "debug", skip(info_hash, peer_id))]
    pub async fn connect(
        endpoint: &str,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<Self, EngineError> {
        let reject = |reason: String| EngineError::HandshakeRejected {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint))
            .await
            .map_err(|_| reject("connect timed out".to_string()))?
            .map_err(|e| reject(format!("connect failed: {e}")))?;

        let ours = Handshake::new(info_hash, peer_id);
        Handshake::write(&mut stream, &ours)
            .await
            .map_err(|e| reject(format!("failed to send handshake: {e}")))?;

        let theirs = Handshake::read(&mut stream)
            .await
            .map_err(|e| reject(format!("failed to read handshake: {e}")))?;
        theirs
            .validate(info_hash)
            .map_err(|e| reject(e.to_string()))?;

        let mut session = PeerSession {
            endpoint: endpoint.to_string(),
            stream,
            bitfield: Bitfield::empty(0),
            state: SessionState::HandshakeSent,
            failures: 0,
        };

        session.state = SessionState::BitfieldAwait;
        let bitfield = timeout(BITFIELD_TIMEOUT, read_message(&mut session.stream))
            .await
            .map_err(|_| reject("timed out awaiting bitfield".to_string()))?
            .map_err(|e| reject(format!("failed to read bitfield: {e}")))?;
        match bitfield {
            Some(Message::Bitfield(bits)) => session.bitfield = bits,
            Some(other) => {
                return Err(reject(format!(
                    "expected bitfield, got {other:?} instead"
                )))
            }
            None => return Err(reject("peer closed connection before bitfield".to_string())),
        }

        session.state = SessionState::InterestedSent;
        write_message(&mut session.stream, &Message::Interested)
            .await
            .map_err(|e| reject(format!("failed to send interested: {e}")))?;

        loop {
            let message = timeout(UNCHOKE_TIMEOUT, read_message(&mut session.stream))
                .await
                .map_err(|_| reject("timed out awaiting unchoke".to_string()))?
                .map_err(|e| reject(format!("failed to read message: {e}")))?;
            match message {
                Some(Message::Unchoke) => break,
                Some(Message::Choke) => continue,
                Some(_) => continue,
                None => return Err(reject("peer closed connection before unchoke".to_string())),
            }
        }

        session.state = SessionState::Active;
        debug!(endpoint, "peer session active");
        Ok(session)
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.has_piece(index)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == SessionState::Dead || self.failures >= FAILURE_THRESHOLD
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= FAILURE_THRESHOLD {
            self.state = SessionState::Dead;
        }
    }

    /// Requests every block of `piece_length` bytes (the final piece may
    /// be shorter) one at a time, in order, and assembles the result.
    /// Any protocol error or mismatched response kills the session and
    /// returns `PieceFailed`.
    #[instrument(level = "trace", skip(self))]
    pub async fn download_piece(
        &mut self,
        index: usize,
        piece_length: u64,
    ) -> Result<Vec<u8>, EngineError> {
        let fail = |reason: String| EngineError::PieceFailed { index, reason };

        let mut block = Vec::with_capacity(piece_length as usize);
        let mut begin: u32 = 0;
        while (begin as u64) < piece_length {
            let remaining = piece_length - begin as u64;
            let length = remaining.min(BLOCK_SIZE as u64) as u32;

            let request = Message::Request {
                index: index as u32,
                begin,
                length,
            };
            if let Err(e) = write_message(&mut self.stream, &request).await {
                self.state = SessionState::Dead;
                return Err(fail(format!("failed to send request: {e}")));
            }

            let response = match timeout(BLOCK_READ_TIMEOUT, read_message(&mut self.stream)).await
            {
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => {
                    self.state = SessionState::Dead;
                    return Err(fail("peer closed connection mid-piece".to_string()));
                }
                Ok(Err(e)) => {
                    self.state = SessionState::Dead;
                    return Err(fail(format!("read error: {e}")));
                }
                Err(_) => {
                    self.state = SessionState::Dead;
                    return Err(fail("timed out awaiting block".to_string()));
                }
            };

            match response {
                Message::Piece {
                    index: recv_index,
                    begin: recv_begin,
                    block: payload,
                } if recv_index as usize == index && recv_begin == begin => {
                    if payload.len() != length as usize {
                        self.state = SessionState::Dead;
                        return Err(fail(format!(
                            "block length mismatch: expected {length}, got {}",
                            payload.len()
                        )));
                    }
                    block.extend_from_slice(&payload);
                }
                Message::Choke => {
                    warn!(index, "choked mid-piece");
                    self.state = SessionState::Dead;
                    return Err(fail("choked mid-piece".to_string()));
                }
                other => {
                    self.state = SessionState::Dead;
                    return Err(fail(format!(
                        "expected piece block at ({index}, {begin}), got {other:?}"
                    )));
                }
            }

            begin += length;
        }

        Ok(block)
    }
}

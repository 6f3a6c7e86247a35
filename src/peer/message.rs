//! Wire framing for the BitTorrent peer protocol. All non-handshake
//! messages are length-prefixed: a 4-byte big-endian length `L`, then
//! `L` bytes of payload whose first byte is the message id.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// The granularity of wire `request` messages.
pub const BLOCK_SIZE: u32 = 16384;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bitfield),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    /// A message id the core does not interpret; §4.D says these "may be
    /// received and are ignored".
    Unknown(u8),
}

/// A packed bit vector advertising which pieces a peer possesses. Bit
/// positions map MSB-first: piece `k` is available iff bit `7 - (k % 8)`
/// of byte `k / 8` is set. Missing trailing bits (a bitfield shorter than
/// spec, or an index past its end) are treated as zero rather than a
/// fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bytes: Vec<u8>,
}

impl Bitfield {
    pub fn from_payload(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn empty(num_pieces: usize) -> Self {
        Self {
            bytes: vec![0u8; num_pieces.div_ceil(8)],
        }
    }

    pub fn has_piece(&self, index: usize) -> bool {
        let byte_i = index / 8;
        let bit_i = index % 8;
        match self.bytes.get(byte_i) {
            Some(byte) => byte & (0b1000_0000 >> bit_i) != 0,
            None => false,
        }
    }

    pub fn set_piece(&mut self, index: usize) {
        let byte_i = index / 8;
        let bit_i = index % 8;
        if byte_i >= self.bytes.len() {
            self.bytes.resize(byte_i + 1, 0);
        }
        self.bytes[byte_i] |= 0b1000_0000 >> bit_i;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn encode_header(buf: &mut Vec<u8>, id: u8, payload_len: u32) -> io::Result<()> {
    buf.write_u32::<BigEndian>(payload_len + 1)?;
    buf.push(id);
    Ok(())
}

/// Serializes a `Message` into its length-prefixed wire form and writes
/// it to the stream.
pub async fn write_message(stream: &mut TcpStream, message: &Message) -> io::Result<()> {
    let mut buf = Vec::new();
    match message {
        Message::Choke => encode_header(&mut buf, 0, 0)?,
        Message::Unchoke => encode_header(&mut buf, 1, 0)?,
        Message::Interested => encode_header(&mut buf, 2, 0)?,
        Message::NotInterested => encode_header(&mut buf, 3, 0)?,
        Message::Have(index) => {
            encode_header(&mut buf, 4, 4)?;
            buf.write_u32::<BigEndian>(*index)?;
        }
        Message::Bitfield(bitfield) => {
            encode_header(&mut buf, 5, bitfield.as_bytes().len() as u32)?;
            buf.extend_from_slice(bitfield.as_bytes());
        }
        Message::Request { index, begin, length } => {
            encode_header(&mut buf, 6, 12)?;
            buf.write_u32::<BigEndian>(*index)?;
            buf.write_u32::<BigEndian>(*begin)?;
            buf.write_u32::<BigEndian>(*length)?;
        }
        Message::Piece { index, begin, block } => {
            encode_header(&mut buf, 7, (8 + block.len()) as u32)?;
            buf.write_u32::<BigEndian>(*index)?;
            buf.write_u32::<BigEndian>(*begin)?;
            buf.extend_from_slice(block);
        }
        Message::Cancel { index, begin, length } => {
            encode_header(&mut buf, 8, 12)?;
            buf.write_u32::<BigEndian>(*index)?;
            buf.write_u32::<BigEndian>(*begin)?;
            buf.write_u32::<BigEndian>(*length)?;
        }
        Message::Unknown(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot encode an unknown message",
            ));
        }
    }
    stream.write_all(&buf).await
}

fn parse_triplet(body: &[u8], label: &str) -> io::Result<(u32, u32, u32)> {
    if body.len() != 12 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{label} payload must be 12 bytes, got {}", body.len()),
        ));
    }
    let mut cursor = Cursor::new(body);
    Ok((
        cursor.read_u32::<BigEndian>()?,
        cursor.read_u32::<BigEndian>()?,
        cursor.read_u32::<BigEndian>()?,
    ))
}

/// Reads one framed message from the stream, transparently skipping
/// zero-length keep-alives. Returns `Ok(None)` on a clean EOF.
pub async fn read_message(stream: &mut TcpStream) -> io::Result<Option<Message>> {
    loop {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let length = u32::from_be_bytes(len_buf) as usize;
        if length == 0 {
            continue; // keep-alive
        }

        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await?;
        let id = payload[0];
        let body = &payload[1..];

        let message = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                if body.len() != 4 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "have payload must be 4 bytes"));
                }
                Message::Have(u32::from_be_bytes(body.try_into().unwrap()))
            }
            5 => Message::Bitfield(Bitfield::from_payload(body.to_vec())),
            6 => {
                let (index, begin, length) = parse_triplet(body, "request")?;
                Message::Request { index, begin, length }
            }
            7 => {
                if body.len() < 8 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "piece payload too short"));
                }
                let mut cursor = Cursor::new(&body[0..8]);
                let index = cursor.read_u32::<BigEndian>()?;
                let begin = cursor.read_u32::<BigEndian>()?;
                Message::Piece { index, begin, block: body[8..].to_vec() }
            }
            8 => {
                let (index, begin, length) = parse_triplet(body, "cancel")?;
                Message::Cancel { index, begin, length }
            }
            other => Message::Unknown(other),
        };
        return Ok(Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn bitfield_maps_msb_first() {
        let bf = Bitfield::from_payload(vec![0b1010_0000]);
        assert!(bf.has_piece(0));
        assert!(!bf.has_piece(1));
        assert!(bf.has_piece(2));
        assert!(!bf.has_piece(3));
    }

    #[test]
    fn bitfield_tolerates_short_payload() {
        let bf = Bitfield::from_payload(vec![0b1000_0000]);
        assert!(bf.has_piece(0));
        assert!(!bf.has_piece(100));
    }

    #[test]
    fn bitfield_set_piece_round_trips() {
        let mut bf = Bitfield::empty(20);
        bf.set_piece(17);
        assert!(bf.has_piece(17));
        assert!(!bf.has_piece(16));
    }

    #[tokio::test]
    async fn request_message_round_trips_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_message(&mut socket).await.unwrap()
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let sent = Message::Request { index: 3, begin: 16384, length: 16384 };
        write_message(&mut client, &sent).await.unwrap();

        let received = server.await.unwrap().unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn keep_alive_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_message(&mut socket).await.unwrap()
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[0, 0, 0, 0]).await.unwrap(); // keep-alive
        write_message(&mut client, &Message::Unchoke).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, Some(Message::Unchoke));
    }
}

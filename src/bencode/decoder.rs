//! Recursive-descent bencode decoder over a byte slice.
//!
//! Unlike a reader-based decoder, working over a slice with an explicit
//! cursor lets every decoded value report the exact byte span it came
//! from. The metainfo loader needs the span of the `info` sub-dictionary,
//! byte-identical to its source, to compute a correct info-hash: feeding a
//! re-encoded copy through SHA-1 only produces the right hash if the
//! re-encoder happens to be byte-exact, which a canonical encoder is, but
//! relying on that is fragile, so we hash the original span instead.
use super::{BencodeError, BencodeResult, BencodeValue};
use std::collections::HashMap;
use tracing::instrument;

/// A decoded dictionary plus the exact `[start, end)` byte span of each
/// top-level value, keyed the same way as the dictionary itself.
#[derive(Debug)]
pub struct SpannedDict {
    pub value: HashMap<Vec<u8>, BencodeValue>,
    pub spans: HashMap<Vec<u8>, (usize, usize)>,
}

/// Cursor-based decoder over a byte slice.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn error(&self, reason: impl Into<String>) -> BencodeError {
        BencodeError::MalformedBencode {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error("unexpected end of input"))
    }

    fn take(&mut self, n: usize) -> BencodeResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(self.error("unexpected end of input"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn expect(&mut self, byte: u8) -> BencodeResult<()> {
        let got = self.peek()?;
        if got != byte {
            return Err(self.error(format!(
                "expected '{}', found '{}'",
                byte as char, got as char
            )));
        }
        self.pos += 1;
        Ok(())
    }

    fn read_until(&mut self, delimiter: u8) -> BencodeResult<&'a [u8]> {
        let start = self.pos;
        loop {
            let byte = self.peek()?;
            if byte == delimiter {
                let slice = &self.data[start..self.pos];
                self.pos += 1;
                return Ok(slice);
            }
            self.pos += 1;
        }
    }

    /// Decodes `<len>:<bytes>`.
    #[instrument(skip(self), level = "trace")]
    pub fn decode_string(&mut self) -> BencodeResult<Vec<u8>> {
        let len_bytes = self.read_until(b':')?;
        let len_str = std::str::from_utf8(len_bytes)
            .map_err(|_| self.error("string length is not valid UTF-8"))?;
        let len: usize = len_str
            .parse()
            .map_err(|_| self.error("invalid string length"))?;
        Ok(self.take(len)?.to_vec())
    }

    /// Decodes `i<signed-ascii>e`, rejecting leading zeros and `-0`.
    #[instrument(skip(self), level = "trace")]
    pub fn decode_integer(&mut self) -> BencodeResult<i64> {
        self.expect(b'i')?;
        let num_bytes = self.read_until(b'e')?;
        let num_str = std::str::from_utf8(num_bytes)
            .map_err(|_| self.error("integer is not valid UTF-8"))?;

        if num_str.is_empty() {
            return Err(self.error("empty integer"));
        }
        if num_str == "-0" {
            return Err(self.error("'-0' is not a valid integer"));
        }
        let digits = num_str.strip_prefix('-').unwrap_or(num_str);
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(self.error("integer has a leading zero"));
        }

        num_str
            .parse()
            .map_err(|_| self.error("invalid integer value"))
    }

    #[instrument(skip(self), level = "trace")]
    fn decode_list(&mut self) -> BencodeResult<Vec<BencodeValue>> {
        self.expect(b'l')?;
        let mut list = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.pos += 1;
                return Ok(list);
            }
            list.push(self.decode_value()?);
        }
    }

    #[instrument(skip(self), level = "trace")]
    fn decode_dict(&mut self) -> BencodeResult<HashMap<Vec<u8>, BencodeValue>> {
        Ok(self.decode_dict_with_spans()?.value)
    }

    /// Decodes a dictionary, recording the `[start, end)` span of every
    /// value alongside its key.
    #[instrument(skip(self), level = "trace")]
    pub fn decode_dict_with_spans(&mut self) -> BencodeResult<SpannedDict> {
        self.expect(b'd')?;
        let mut value = HashMap::new();
        let mut spans = HashMap::new();
        let mut prev_key: Option<Vec<u8>> = None;

        loop {
            if self.peek()? == b'e' {
                self.pos += 1;
                return Ok(SpannedDict { value, spans });
            }
            let key_start = self.pos;
            let key = self.decode_string()?;
            if let Some(prev) = &prev_key {
                if key <= *prev {
                    return Err(BencodeError::MalformedBencode {
                        offset: key_start,
                        reason: "dictionary keys are not in strict ascending order".to_string(),
                    });
                }
            }
            let val_start = self.pos;
            let val = self.decode_value()?;
            let val_end = self.pos;
            spans.insert(key.clone(), (val_start, val_end));
            value.insert(key.clone(), val);
            prev_key = Some(key);
        }
    }

    /// Decodes the next value of any kind.
    #[instrument(skip(self), level = "trace")]
    pub fn decode_value(&mut self) -> BencodeResult<BencodeValue> {
        match self.peek()? {
            b'0'..=b'9' => self.decode_string().map(BencodeValue::String),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'l' => self.decode_list().map(BencodeValue::List),
            b'd' => self.decode_dict().map(BencodeValue::Dict),
            other => Err(self.error(format!("unexpected character '{}'", other as char))),
        }
    }
}

/// Decodes a single bencode value from `data`.
#[instrument(skip(data), level = "debug")]
pub fn decode(data: &[u8]) -> BencodeResult<BencodeValue> {
    let mut decoder = Decoder::new(data);
    decoder.decode_value()
}

/// Decodes the root value, which must be a dictionary, and returns it
/// together with the exact byte span of each of its top-level entries.
#[instrument(skip(data), level = "debug")]
pub fn decode_root_with_spans(data: &[u8]) -> BencodeResult<SpannedDict> {
    let mut decoder = Decoder::new(data);
    decoder.decode_dict_with_spans()
}

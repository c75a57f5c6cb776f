//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character hex length that counts the prefix
//! itself, or "0000" for flush and "0001" for the protocol v2 delimiter.
//!
//! Decoding is streaming: frames are cut from a growing buffer as soon as they
//! are complete, so a frame split across any number of reads decodes the same
//! as one delivered in a single read. At most one frame is ever buffered.

use crate::{GitError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length of the hex length prefix.
pub const HEADER_LEN: usize = 4;
/// Largest frame (prefix included) git will send or accept.
pub const MAX_PKT_LEN: usize = 65520;
/// Largest payload that fits in a single data frame.
pub const MAX_DATA_LEN: usize = MAX_PKT_LEN - HEADER_LEN;

const FLUSH: &[u8; 4] = b"0000";
const DELIMITER: &[u8; 4] = b"0001";

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Bytes),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Bytes>) -> Self {
        Self::Data(b.into())
    }

    /// Appends the encoded packet to `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Self::Data(data) => {
                if data.len() > MAX_DATA_LEN {
                    return Err(GitError::InvalidPktLine(format!(
                        "payload of {} bytes exceeds maximum of {MAX_DATA_LEN}",
                        data.len()
                    )));
                }
                dst.reserve(HEADER_LEN + data.len());
                dst.put_slice(format!("{:04x}", data.len() + HEADER_LEN).as_bytes());
                dst.put_slice(data);
            }
            Self::Flush => dst.put_slice(FLUSH),
            Self::Delimiter => dst.put_slice(DELIMITER),
        }
        Ok(())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

/// What a length prefix announces.
enum Header {
    Flush,
    Delimiter,
    /// Total frame length, prefix included.
    Data(usize),
}

fn parse_header(prefix: &[u8]) -> Result<Header> {
    let mut len = 0usize;
    for &b in prefix {
        let digit = (b as char).to_digit(16).ok_or_else(|| {
            GitError::InvalidPktLine(format!(
                "non-hex length prefix {:?}",
                String::from_utf8_lossy(prefix)
            ))
        })?;
        len = (len << 4) | digit as usize;
    }

    match len {
        0 => Ok(Header::Flush),
        1 => Ok(Header::Delimiter),
        2 | 3 => Err(GitError::InvalidPktLine(format!(
            "reserved length {len:04x}"
        ))),
        n if n > MAX_PKT_LEN => Err(GitError::InvalidPktLine(format!(
            "length {n} exceeds maximum of {MAX_PKT_LEN}"
        ))),
        n => Ok(Header::Data(n)),
    }
}

/// Stateless pkt-line codec for use with `tokio_util::codec` framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PktLineCodec;

impl Decoder for PktLineCodec {
    type Item = PktLine;
    type Error = GitError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PktLine>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        match parse_header(&src[..HEADER_LEN])? {
            Header::Flush => {
                src.advance(HEADER_LEN);
                Ok(Some(PktLine::Flush))
            }
            Header::Delimiter => {
                src.advance(HEADER_LEN);
                Ok(Some(PktLine::Delimiter))
            }
            Header::Data(len) => {
                if src.len() < len {
                    src.reserve(len - src.len());
                    return Ok(None);
                }
                let mut frame = src.split_to(len);
                frame.advance(HEADER_LEN);
                Ok(Some(PktLine::Data(frame.freeze())))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<PktLine>> {
        match self.decode(src)? {
            Some(pkt) => Ok(Some(pkt)),
            None if src.is_empty() => Ok(None),
            None => Err(truncated(src)),
        }
    }
}

impl Encoder<PktLine> for PktLineCodec {
    type Error = GitError;

    fn encode(&mut self, item: PktLine, dst: &mut BytesMut) -> Result<()> {
        item.encode_to(dst)
    }
}

fn truncated(rest: &[u8]) -> GitError {
    let declared = if rest.len() >= HEADER_LEN {
        String::from_utf8_lossy(&rest[..HEADER_LEN]).into_owned()
    } else {
        String::from_utf8_lossy(rest).into_owned()
    };
    GitError::InvalidPktLine(format!(
        "stream ended inside a frame (prefix {declared:?}, {} bytes buffered)",
        rest.len()
    ))
}

/// Push-style streaming decoder.
///
/// Bytes arrive through [`feed`](Self::feed) in whatever chunks the transport
/// produces; complete frames are pulled out with
/// [`next_pkt`](Self::next_pkt).
#[derive(Debug, Default)]
pub struct PktLineDecoder {
    buf: BytesMut,
    codec: PktLineCodec,
}

impl PktLineDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete packet, or `None` if more bytes are needed.
    pub fn next_pkt(&mut self) -> Result<Option<PktLine>> {
        self.codec.decode(&mut self.buf)
    }

    /// Bytes received but not yet consumed as a frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Removes and returns everything still buffered.
    pub fn take_buffered(&mut self) -> BytesMut {
        self.buf.split()
    }

    /// Signals end of input; fails if a partial frame is left over.
    pub fn finish(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(truncated(&self.buf))
        }
    }
}

/// Lazy iterator over the packets of an in-memory buffer.
///
/// Yields an error (and then stops) on malformed or truncated input.
pub struct PktLines<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> PktLines<'a> {
    /// Creates an iterator over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            failed: false,
        }
    }
}

impl Iterator for PktLines<'_> {
    type Item = Result<PktLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.is_empty() {
            return None;
        }
        if self.data.len() < HEADER_LEN {
            self.failed = true;
            return Some(Err(truncated(self.data)));
        }

        let item = parse_header(&self.data[..HEADER_LEN]).and_then(|header| match header {
            Header::Flush => Ok((HEADER_LEN, PktLine::Flush)),
            Header::Delimiter => Ok((HEADER_LEN, PktLine::Delimiter)),
            Header::Data(len) if self.data.len() < len => Err(truncated(self.data)),
            Header::Data(len) => Ok((
                len,
                PktLine::Data(Bytes::copy_from_slice(&self.data[HEADER_LEN..len])),
            )),
        });

        match item {
            Ok((consumed, pkt)) => {
                self.data = &self.data[consumed..];
                Some(Ok(pkt))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decodes every packet in `data`.
pub fn decode_all(data: &[u8]) -> Result<Vec<PktLine>> {
    PktLines::new(data).collect()
}

//! Frame codec: pure encode/decode of [`Message`] values to/from the
//! 9-byte-header wire format. No I/O, no background state.

use crate::error::CodecError;

/// Fixed header size: 1 byte code + 4 byte id + 2 byte name_len + 2 byte payload_len.
pub const MESSAGE_HEADER_SIZE: usize = 9;

/// Hard ceiling on a full encoded frame (header + name + payload).
pub const MAX_MESSAGE_SIZE: usize = 100_000;

/// Reserved application/transport marker codes. Application codes are 0..=199;
/// 200..=251 is reserved for future use.
pub const CODE_DUPLICATE_ID: u8 = 252;
pub const CODE_TIMEOUT: u8 = 253;
pub const CODE_MISSING_ROUTE: u8 = 254;
pub const CODE_GENERIC_ERROR: u8 = 255;

/// The single wire and in-memory message unit.
///
/// `id == 0` means "unsolicited/async-only"; non-zero ids are assigned by
/// a [`crate::mux::SyncMultiplexer`] and echoed back by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: u8,
    pub id: u32,
    pub name: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(code: u8, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            id: 0,
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Total encoded length of this message, without actually encoding it.
    pub fn encoded_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.name.len() + self.payload.len()
    }

    /// Whether this message carries a reserved transport-level marker code.
    pub fn is_error_marker(&self) -> bool {
        self.code >= 200
    }
}

/// Serialize `msg` into its self-delimited wire representation.
///
/// Errors if the encoded frame would exceed [`MAX_MESSAGE_SIZE`] or if either
/// length field would overflow 16 bits.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let name_len = msg.name.len();
    let payload_len = msg.payload.len();
    let total = MESSAGE_HEADER_SIZE + name_len + payload_len;

    if name_len > u16::MAX as usize || payload_len > u16::MAX as usize || total > MAX_MESSAGE_SIZE
    {
        return Err(CodecError::FrameTooLarge(total));
    }

    let mut buf = Vec::with_capacity(total);
    buf.push(msg.code);
    buf.extend_from_slice(&msg.id.to_be_bytes());
    buf.extend_from_slice(&(name_len as u16).to_be_bytes());
    buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
    buf.extend_from_slice(msg.name.as_bytes());
    buf.extend_from_slice(&msg.payload);
    Ok(buf)
}

/// Parsed header fields, before the variable-length body is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub code: u8,
    pub id: u32,
    pub name_len: u16,
    pub payload_len: u16,
}

impl Header {
    pub fn body_len(&self) -> usize {
        self.name_len as usize + self.payload_len as usize
    }
}

/// Parse the fixed 9-byte header out of `buf`. `buf` must be exactly
/// [`MESSAGE_HEADER_SIZE`] bytes; callers that stream from a transport read
/// exactly that many bytes first.
///
/// Rejects a header whose declared `name_len + payload_len + 9` would
/// exceed [`MAX_MESSAGE_SIZE`]: that is a protocol violation, not merely an
/// oversized buffer, and callers (the stream reader in particular) must
/// treat it as fatal for the connection rather than attempt to read the
/// declared body.
pub fn decode_header(buf: &[u8]) -> Result<Header, CodecError> {
    if buf.len() < MESSAGE_HEADER_SIZE {
        return Err(CodecError::TooShortMessage);
    }
    let code = buf[0];
    let id = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let name_len = u16::from_be_bytes([buf[5], buf[6]]);
    let payload_len = u16::from_be_bytes([buf[7], buf[8]]);

    let total = MESSAGE_HEADER_SIZE + name_len as usize + payload_len as usize;
    if total > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge(total));
    }

    Ok(Header {
        code,
        id,
        name_len,
        payload_len,
    })
}

/// Assemble a [`Message`] from a parsed header and its exact body bytes.
/// `body` must be exactly `header.body_len()` bytes.
pub fn decode_body(header: Header, body: &[u8]) -> Result<Message, CodecError> {
    if body.len() != header.body_len() {
        return Err(CodecError::BinaryLength);
    }
    let (name_bytes, payload_bytes) = body.split_at(header.name_len as usize);
    let name = String::from_utf8_lossy(name_bytes).into_owned();
    Ok(Message {
        code: header.code,
        id: header.id,
        name,
        payload: payload_bytes.to_vec(),
    })
}

/// Decode a complete, single-buffer frame (header + body in one slice).
/// Convenience wrapper over [`decode_header`] + [`decode_body`] for tests
/// and for any caller that already has the whole frame in memory.
pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
    let header = decode_header(buf)?;
    let body = &buf[MESSAGE_HEADER_SIZE..];
    if body.len() != header.body_len() {
        return Err(CodecError::BinaryLength);
    }
    decode_body(header, body)
}

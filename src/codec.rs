//! Length-prefixed framing and the action / response payload encodings.
//!
//! ## Frame header (8 bytes)
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 2    | magic `b"SC"`                  |
//! | 2      | 1    | kind (1 action, 2 response, 3 quit) |
//! | 3      | 1    | flags (reserved, zero)         |
//! | 4      | 4    | payload length, little endian  |
//!
//! ## Response payload
//!
//! `metadata_len: u32 LE`, then `metadata_len` bytes of metadata JSON, then the
//! combined frame buffer (everything that remains).

use std::io::{ErrorKind, Read, Write};

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::cache::ObjectListCache;
use crate::error::CodecError;
use crate::protocol::{Metadata, StepResponse};

pub const MAGIC: [u8; 2] = *b"SC";
pub const HEADER_SIZE: usize = 8;
/// Largest payload accepted by default (64 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

const OBJECTS_KEY: &str = "objects";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Action = 1,
    Response = 2,
    Quit = 3,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Result<Self, CodecError> {
        match v {
            1 => Ok(MessageKind::Action),
            2 => Ok(MessageKind::Response),
            3 => Ok(MessageKind::Quit),
            other => Err(CodecError::UnknownKind(other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MessageKind::Action => "action",
            MessageKind::Response => "response",
            MessageKind::Quit => "quit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Bytes,
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

pub fn encode_header(kind: MessageKind, len: usize) -> Result<[u8; HEADER_SIZE], CodecError> {
    let len32 = u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge {
        len,
        max: u32::MAX as usize,
    })?;
    let mut header = [0u8; HEADER_SIZE];
    header[..2].copy_from_slice(&MAGIC);
    header[2] = kind as u8;
    header[4..].copy_from_slice(&len32.to_le_bytes());
    Ok(header)
}

/// Parse a header, returning the message kind and payload length.
pub fn decode_header(
    header: &[u8; HEADER_SIZE],
    max_payload: usize,
) -> Result<(MessageKind, usize), CodecError> {
    if header[..2] != MAGIC {
        return Err(CodecError::BadMagic([header[0], header[1]]));
    }
    let kind = MessageKind::from_u8(header[2])?;
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > max_payload {
        return Err(CodecError::PayloadTooLarge {
            len,
            max: max_payload,
        });
    }
    Ok((kind, len))
}

pub fn write_message<W: Write>(
    writer: &mut W,
    kind: MessageKind,
    payload: &[u8],
) -> Result<(), CodecError> {
    let header = encode_header(kind, payload.len())?;
    writer.write_all(&header)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one message.  `Ok(None)` means the peer closed between messages.
pub fn read_message<R: Read>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<Message>, CodecError> {
    let mut header = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(CodecError::Truncated {
            expected: HEADER_SIZE,
            actual: got,
        });
    }
    let (kind, len) = decode_header(&header, max_payload)?;
    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload)?;
    if got < len {
        return Err(CodecError::Truncated {
            expected: len,
            actual: got,
        });
    }
    Ok(Some(Message {
        kind,
        payload: Bytes::from(payload),
    }))
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Action payload
// ---------------------------------------------------------------------------

pub fn encode_action(wire: &Map<String, Value>) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(wire)?)
}

pub fn decode_action(payload: &[u8]) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        _ => Err(CodecError::NotAnObject),
    }
}

// ---------------------------------------------------------------------------
// Response payload
// ---------------------------------------------------------------------------

/// Encode a response.  The object list is written unless the step reused it.
pub fn encode_response(response: &StepResponse) -> Result<Vec<u8>, CodecError> {
    let mut metadata = serde_json::to_value(&response.metadata)?;
    if !response.metadata.fast_emit {
        if let Value::Object(map) = &mut metadata {
            map.insert(
                OBJECTS_KEY.into(),
                serde_json::to_value(response.metadata.objects.as_ref())?,
            );
        }
    }
    let metadata = serde_json::to_vec(&metadata)?;
    let metadata_len = u32::try_from(metadata.len()).map_err(|_| CodecError::PayloadTooLarge {
        len: metadata.len(),
        max: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(4 + metadata.len() + response.frame_buffer.len());
    out.extend_from_slice(&metadata_len.to_le_bytes());
    out.extend_from_slice(&metadata);
    out.extend_from_slice(&response.frame_buffer);
    Ok(out)
}

/// Decode a response, resolving a reused object list through `cache`.
///
/// The frame buffer is a zero-copy slice of `payload`.
pub fn decode_response(
    payload: Bytes,
    cache: &mut ObjectListCache,
) -> Result<StepResponse, CodecError> {
    if payload.len() < 4 {
        return Err(CodecError::Truncated {
            expected: 4,
            actual: payload.len(),
        });
    }
    let metadata_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let end = 4 + metadata_len;
    if payload.len() < end {
        return Err(CodecError::Truncated {
            expected: end,
            actual: payload.len(),
        });
    }

    let mut raw: Value = serde_json::from_slice(&payload[4..end])?;
    let objects = match &mut raw {
        Value::Object(map) => map.remove(OBJECTS_KEY),
        _ => return Err(CodecError::NotAnObject),
    };
    let mut metadata: Metadata = serde_json::from_value(raw)?;
    metadata.objects = cache.resolve(metadata.fast_emit, objects)?;

    Ok(StepResponse {
        metadata,
        frame_buffer: payload.slice(end..),
    })
}

//! # codec
//!
//! Binary envelope shared by every node on the range:
//!
//! ```text
//! [0xAA][0x55][revision:1][type_code:1][payload_len:4 LE][payload:payload_len]
//! ```
//!
//! A frame whose declared length does not match the bytes that follow the
//! header is rejected, never repaired.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use range_types::MAGIC;

use crate::error::FrameError;

pub const HEADER_LEN: usize = 8;

/// Decoded envelope. The payload borrows from the datagram buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub revision: u8,
    pub type_code: u8,
    pub payload: &'a [u8],
}

pub fn decode(frame: &[u8]) -> Result<Envelope<'_>, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::FrameTooShort { len: frame.len() });
    }

    let mut header = &frame[..HEADER_LEN];
    let magic = [header.get_u8(), header.get_u8()];
    if magic != MAGIC {
        return Err(FrameError::BadMagic { found: magic });
    }
    let revision = header.get_u8();
    let type_code = header.get_u8();
    let declared = header.get_u32_le() as usize;

    let payload = &frame[HEADER_LEN..];
    if declared != payload.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            available: payload.len(),
        });
    }

    Ok(Envelope {
        revision,
        type_code,
        payload,
    })
}

pub fn encode(revision: u8, type_code: u8, payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLarge { len: payload.len() })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&MAGIC);
    buf.put_u8(revision);
    buf.put_u8(type_code);
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

//! Wire format encoding and decoding.
//!
//! Every frame starts with a 5-byte length prefix followed by a msgpack
//! header map with two entries (code, sync) and then the body:
//! ```text
//! ┌──────┬──────────┬──────┬──────┬────────┬──────┬──────────────┬──────────┐
//! │ 0xce │ Length   │ 0x82 │ 0x00 │ Code   │ 0x01 │ 0xce Sync    │ Body     │
//! │ 1    │ 4 BE     │ 1    │ 1    │ 1 | 5  │ 1    │ 1 + 4 BE     │ N bytes  │
//! └──────┴──────────┴──────┴──────┴────────┴──────┴──────────────┴──────────┘
//! ```
//!
//! The code is written as a positive fixint when it fits in 7 bits (compact
//! header, 14 bytes) and as `0xce` + uint32 BE otherwise (extended header,
//! 18 bytes). Length counts everything after the 5-byte prefix.

use crate::codec::{pack_big_to, read_value, value_as_u32};
use crate::error::{IprotoError, Result};

/// Size of the length prefix (marker + uint32 BE).
pub const LENGTH_PREFIX_SIZE: usize = 5;

/// Msgpack uint32 marker used for the length prefix and wide header fields.
pub const UINT32_MARKER: u8 = 0xce;

/// Msgpack fixmap marker with two entries.
pub const HEADER_MAP_MARKER: u8 = 0x82;

/// Size of a header with a one-byte code.
pub const COMPACT_HEADER_SIZE: usize = 14;

/// Size of a header with a four-byte code.
pub const EXTENDED_HEADER_SIZE: usize = 18;

/// Largest header the encoder produces.
pub const MAX_HEADER_SIZE: usize = EXTENDED_HEADER_SIZE;

/// Largest code that fits a msgpack positive fixint.
pub const MAX_COMPACT_CODE: u32 = 0x7f;

/// Default upper bound on a declared frame length (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Msgpack map keys used in headers and bodies.
pub mod keys {
    pub const CODE: u8 = 0x00;
    pub const SYNC: u8 = 0x01;
    pub const SCHEMA_ID: u8 = 0x05;
    pub const SPACE_NO: u8 = 0x10;
    pub const INDEX_NO: u8 = 0x11;
    pub const KEY: u8 = 0x20;
    pub const TUPLE: u8 = 0x21;
    pub const DATA: u8 = 0x30;
    pub const ERROR: u8 = 0x31;
}

/// Request and response codes.
pub mod codes {
    /// Successful response.
    pub const OK: u32 = 0x00;
    pub const UPDATE: u32 = 0x04;
    pub const PING: u32 = 0x40;
    /// Set on every error response; the low bits carry the error code.
    pub const ERROR_FLAG: u32 = 0x8000;

    /// Check whether a response code signals an error.
    #[inline]
    pub fn is_error(code: u32) -> bool {
        code & ERROR_FLAG != 0
    }
}

/// Command code, classified by the width it needs on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    /// Fits a positive fixint.
    Compact(u8),
    /// Needs a uint32.
    Extended(u32),
}

impl RequestCode {
    /// Classify a code by magnitude.
    #[inline]
    pub fn new(code: u32) -> Self {
        if code <= MAX_COMPACT_CODE {
            RequestCode::Compact(code as u8)
        } else {
            RequestCode::Extended(code)
        }
    }

    /// Numeric value of the code.
    #[inline]
    pub fn value(self) -> u32 {
        match self {
            RequestCode::Compact(code) => u32::from(code),
            RequestCode::Extended(code) => code,
        }
    }

    /// Size of the header this code produces.
    #[inline]
    pub fn header_size(self) -> usize {
        match self {
            RequestCode::Compact(_) => COMPACT_HEADER_SIZE,
            RequestCode::Extended(_) => EXTENDED_HEADER_SIZE,
        }
    }
}

impl From<u32> for RequestCode {
    fn from(code: u32) -> Self {
        RequestCode::new(code)
    }
}

impl From<u8> for RequestCode {
    fn from(code: u8) -> Self {
        RequestCode::new(u32::from(code))
    }
}

/// Outgoing frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Command or response code.
    pub code: RequestCode,
    /// Correlation id ("sync").
    pub request_id: u32,
    /// Body length in bytes.
    pub body_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(code: impl Into<RequestCode>, request_id: u32, body_length: u32) -> Self {
        Self {
            code: code.into(),
            request_id,
            body_length,
        }
    }

    /// Size of the encoded header.
    #[inline]
    pub fn size(&self) -> usize {
        self.code.header_size()
    }

    /// Value of the length field: header bytes after the prefix plus body.
    #[inline]
    pub fn frame_length(&self) -> u32 {
        (self.size() - LENGTH_PREFIX_SIZE) as u32 + self.body_length
    }

    /// Encode header to bytes.
    ///
    /// Returns the buffer and the number of meaningful bytes in it.
    ///
    /// # Example
    ///
    /// ```
    /// use iproto_client::protocol::{codes, Header};
    ///
    /// let header = Header::new(codes::PING, 1, 0);
    /// let (bytes, len) = header.encode();
    /// assert_eq!(len, 14);
    /// assert_eq!(&bytes[..6], &[0xce, 0, 0, 0, 9, 0x82]);
    /// ```
    pub fn encode(&self) -> ([u8; MAX_HEADER_SIZE], usize) {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        let len = self.encode_into(&mut buf);
        (buf, len)
    }

    /// Encode header into an existing buffer, returning the bytes written.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than [`Header::size`].
    pub fn encode_into(&self, buf: &mut [u8]) -> usize {
        debug_assert!(buf.len() >= self.size());

        buf[0] = UINT32_MARKER;
        pack_big_to(u64::from(self.frame_length()), 4, &mut buf[1..5]);
        buf[5] = HEADER_MAP_MARKER;
        buf[6] = keys::CODE;

        let sync_at = match self.code {
            RequestCode::Compact(code) => {
                buf[7] = code;
                8
            }
            RequestCode::Extended(code) => {
                buf[7] = UINT32_MARKER;
                pack_big_to(u64::from(code), 4, &mut buf[8..12]);
                12
            }
        };

        buf[sync_at] = keys::SYNC;
        buf[sync_at + 1] = UINT32_MARKER;
        pack_big_to(
            u64::from(self.request_id),
            4,
            &mut buf[sync_at + 2..sync_at + 6],
        );

        sync_at + 6
    }
}

/// Validate a length prefix and return the declared frame length.
///
/// Lengths above `max_frame_size` are rejected before anything is allocated.
pub fn decode_length_prefix(prefix: &[u8; LENGTH_PREFIX_SIZE], max_frame_size: u32) -> Result<u32> {
    if prefix[0] != UINT32_MARKER {
        return Err(IprotoError::Protocol(format!(
            "Wrong response header: {:02x?}",
            prefix
        )));
    }

    let length = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
    if length == 0 {
        return Err(IprotoError::Protocol(
            "Packet should not be 0 length".to_string(),
        ));
    }
    if length > max_frame_size {
        return Err(IprotoError::Protocol(format!(
            "Packet length {} exceeds maximum {}",
            length, max_frame_size
        )));
    }

    Ok(length)
}

/// Fields extracted from a decoded header map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHeader {
    pub code: u32,
    pub request_id: u32,
    pub schema_id: Option<u32>,
    /// Bytes occupied by the header map; the body starts here.
    pub size: usize,
}

/// Decode the header map at the start of a frame (after the length prefix).
///
/// Accepts any msgpack integer width for code and sync, and ignores
/// unknown keys.
pub fn decode_header(buf: &[u8]) -> Result<DecodedHeader> {
    let mut rd = buf;
    let map = read_value(&mut rd)
        .map_err(|e| IprotoError::Protocol(format!("Bad header map: {}", e)))?;

    let entries = map
        .as_map()
        .ok_or_else(|| IprotoError::Protocol(format!("Header is not a map: {}", map)))?;

    let mut code = None;
    let mut request_id = None;
    let mut schema_id = None;

    for (key, value) in entries {
        let field = |what| value_as_u32(value, what).map_err(|e| IprotoError::Protocol(e.to_string()));
        match key.as_u64() {
            Some(k) if k == u64::from(keys::CODE) => code = Some(field("code")?),
            Some(k) if k == u64::from(keys::SYNC) => request_id = Some(field("sync")?),
            Some(k) if k == u64::from(keys::SCHEMA_ID) => schema_id = Some(field("schema id")?),
            _ => {}
        }
    }

    Ok(DecodedHeader {
        code: code.ok_or_else(|| IprotoError::Protocol("Header has no code".to_string()))?,
        request_id: request_id
            .ok_or_else(|| IprotoError::Protocol("Header has no sync".to_string()))?,
        schema_id,
        size: buf.len() - rd.len(),
    })
}

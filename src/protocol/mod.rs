//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary framing layer:
//! - Length-prefixed header encoding/decoding (compact and extended shapes)
//! - Outgoing [`PackedPacket`] with a pooled body
//! - Incoming [`Frame`] read one at a time from the socket

mod frame;
mod wire_format;

pub use frame::{
    read_frame, read_frame_with_limit, Frame, PackedPacket, DEFAULT_BODY_CAPACITY, PACKED_OK_BODY,
};
pub use wire_format::{
    codes, decode_header, decode_length_prefix, keys, DecodedHeader, Header, RequestCode,
    COMPACT_HEADER_SIZE, DEFAULT_MAX_FRAME_SIZE, EXTENDED_HEADER_SIZE, HEADER_MAP_MARKER,
    LENGTH_PREFIX_SIZE, MAX_COMPACT_CODE, MAX_HEADER_SIZE, UINT32_MARKER,
};

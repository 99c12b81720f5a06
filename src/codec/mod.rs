//! Codec module - byte packing and msgpack body encoding.
//!
//! - [`pack_big`] / [`pack_little`] - fixed-width Big/Little Endian integers
//! - [`MsgPackCodec`] - typed values via `rmp-serde` (positional, tuple-friendly)
//! - `write_*` / [`read_value`] - streaming body encoding with `rmp` / `rmpv`
//!
//! # Design
//!
//! Codecs are plain functions and marker structs rather than trait objects,
//! so the hot path of packing a request body stays monomorphic.

mod msgpack;
mod pack;

pub(crate) use msgpack::value_as_u32;
pub use msgpack::{
    read_value, write_array_len, write_map_len, write_str, write_uint, write_value, MsgPackCodec,
};
pub use pack::{
    pack_big, pack_big_to, pack_little, pack_little_to, uint32_le, uint64_le, MAX_WIDTH,
};

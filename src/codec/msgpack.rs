//! MsgPack helpers on top of `rmp`, `rmpv` and `rmp-serde`.
//!
//! Request bodies are written field by field with `rmp` primitives straight
//! into a pooled `BytesMut`. Dynamic values (keys, tuple fields, operator
//! arguments) are `rmpv::Value`s. `rmp-serde` bridges typed Rust values to
//! and from those dynamic values.
//!
//! **Note**: typed values are encoded with `to_vec`, not `to_vec_named`.
//! Tuples on the server are positional, so a struct must become an array.
//!
//! # Example
//!
//! ```
//! use iproto_client::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! let user = User { id: 42, name: "hello".to_string() };
//! let value = MsgPackCodec::to_value(&user).unwrap();
//! assert!(value.is_array());
//! let back: User = MsgPackCodec::from_value(&value).unwrap();
//! assert_eq!(back, user);
//! ```

use bytes::buf::Writer;
use bytes::{BufMut, BytesMut};
use rmpv::Value;

use crate::error::{IprotoError, Result};

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (structs as positional arrays).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Convert a typed value into a dynamic msgpack value.
    pub fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
        let bytes = Self::encode(value)?;
        rmpv::decode::read_value(&mut bytes.as_slice()).map_err(IprotoError::encode)
    }

    /// Convert a dynamic msgpack value into a typed value.
    pub fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, value).map_err(IprotoError::decode)?;
        Self::decode(&bytes)
    }
}

#[inline]
fn sink(buf: &mut BytesMut) -> Writer<&mut BytesMut> {
    buf.writer()
}

/// Write a map length marker.
#[inline]
pub fn write_map_len(buf: &mut BytesMut, len: u32) -> Result<()> {
    rmp::encode::write_map_len(&mut sink(buf), len).map_err(IprotoError::encode)?;
    Ok(())
}

/// Write an array length marker.
#[inline]
pub fn write_array_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(IprotoError::encode)?;
    rmp::encode::write_array_len(&mut sink(buf), len).map_err(IprotoError::encode)?;
    Ok(())
}

/// Write an unsigned integer in its most compact form.
#[inline]
pub fn write_uint(buf: &mut BytesMut, value: u64) -> Result<()> {
    rmp::encode::write_uint(&mut sink(buf), value).map_err(IprotoError::encode)?;
    Ok(())
}

/// Write a string.
#[inline]
pub fn write_str(buf: &mut BytesMut, value: &str) -> Result<()> {
    rmp::encode::write_str(&mut sink(buf), value).map_err(IprotoError::encode)?;
    Ok(())
}

/// Write a dynamic value.
#[inline]
pub fn write_value(buf: &mut BytesMut, value: &Value) -> Result<()> {
    rmpv::encode::write_value(&mut sink(buf), value).map_err(IprotoError::encode)
}

/// Read one dynamic value, advancing the slice past it.
#[inline]
pub fn read_value(rd: &mut &[u8]) -> Result<Value> {
    rmpv::decode::read_value(rd).map_err(IprotoError::decode)
}

/// Interpret a value as an unsigned 32-bit integer.
pub(crate) fn value_as_u32(value: &Value, what: &str) -> Result<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| IprotoError::Decode(format!("{} is not a u32: {}", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestTuple {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_struct_encodes_as_array() {
        let tuple = TestTuple {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&tuple).unwrap();

        // 0x93 = fixarray with 3 elements
        assert_eq!(encoded[0], 0x93);
    }

    #[test]
    fn test_value_bridge() {
        let tuple = TestTuple {
            id: 7,
            name: "seven".to_string(),
            active: true,
        };

        let value = MsgPackCodec::to_value(&tuple).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                Value::from(7),
                Value::from("seven"),
                Value::from(true)
            ])
        );

        let back: TestTuple = MsgPackCodec::from_value(&value).unwrap();
        assert_eq!(back, tuple);
    }

    #[test]
    fn test_from_value_type_mismatch() {
        let value = Value::from("not a tuple");
        let result: Result<TestTuple> = MsgPackCodec::from_value(&value);
        assert!(matches!(result, Err(IprotoError::MsgPackDecode(_))));
    }

    #[test]
    fn test_primitive_writers() {
        let mut buf = BytesMut::new();
        write_map_len(&mut buf, 2).unwrap();
        write_uint(&mut buf, 0x10).unwrap();
        write_uint(&mut buf, 512).unwrap();
        write_array_len(&mut buf, 1).unwrap();
        write_str(&mut buf, "=").unwrap();

        assert_eq!(
            &buf[..],
            &[0x82, 0x10, 0xcd, 0x02, 0x00, 0x91, 0xa1, b'=']
        );
    }

    #[test]
    fn test_read_value_advances() {
        let mut buf = BytesMut::new();
        write_uint(&mut buf, 1).unwrap();
        write_str(&mut buf, "two").unwrap();

        let mut rd: &[u8] = &buf;
        assert_eq!(read_value(&mut rd).unwrap(), Value::from(1));
        assert_eq!(read_value(&mut rd).unwrap(), Value::from("two"));
        assert!(rd.is_empty());
    }

    #[test]
    fn test_read_value_truncated() {
        let mut rd: &[u8] = &[0xcd, 0x02];
        assert!(matches!(read_value(&mut rd), Err(IprotoError::Decode(_))));
    }

    #[test]
    fn test_value_as_u32() {
        assert_eq!(value_as_u32(&Value::from(512), "space").unwrap(), 512);
        assert!(value_as_u32(&Value::from(-1), "space").is_err());
        assert!(value_as_u32(&Value::from("x"), "space").is_err());
    }
}

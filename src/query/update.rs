//! Update request.
//!
//! The body is always a four-entry map:
//!
//! ```text
//! { SPACE_NO: space, INDEX_NO: index, KEY: [key...], TUPLE: [[op...], ...] }
//! ```

use bytes::BytesMut;
use rmpv::Value;

use super::{Operator, Query};
use crate::codec::{read_value, value_as_u32, write_array_len, write_map_len, write_uint, write_value};
use crate::error::{IprotoError, Result};
use crate::protocol::{codes, keys, RequestCode};
use crate::schema::{Ident, PackData};

/// Lookup key of the tuple to update.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// Single-part key; still sent as a one-element array.
    Single(Value),
    /// Composite key.
    Tuple(Vec<Value>),
}

impl Key {
    /// Key parts in wire order.
    pub fn parts(&self) -> &[Value] {
        match self {
            Key::Single(value) => std::slice::from_ref(value),
            Key::Tuple(values) => values,
        }
    }
}

macro_rules! single_key_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(value: $ty) -> Self {
                    Key::Single(Value::from(value))
                }
            }
        )*
    };
}

single_key_from!(u32, u64, i32, i64, &str, String);

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Key::Single(value)
    }
}

/// Modify fields of the tuple matching `key`.
///
/// # Example
///
/// ```
/// use iproto_client::{Operator, Update};
///
/// let update = Update::new(512u32, 1u32).set(Operator::assign(1, "new"));
/// assert_eq!(update.ops.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Target space; the connection's default space when unset.
    pub space: Option<Ident>,
    /// Index used for the lookup; index 0 when unset.
    pub index: Option<Ident>,
    pub key: Key,
    pub ops: Vec<Operator>,
}

impl Update {
    pub fn new(space: impl Into<Ident>, key: impl Into<Key>) -> Self {
        Self {
            space: Some(space.into()),
            index: None,
            key: key.into(),
            ops: Vec::new(),
        }
    }

    /// Update in the connection's default space.
    pub fn in_default_space(key: impl Into<Key>) -> Self {
        Self {
            space: None,
            index: None,
            key: key.into(),
            ops: Vec::new(),
        }
    }

    /// Look up by a composite key.
    pub fn key_tuple(mut self, parts: Vec<Value>) -> Self {
        self.key = Key::Tuple(parts);
        self
    }

    pub fn index(mut self, index: impl Into<Ident>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Append an operator.
    pub fn set(mut self, op: Operator) -> Self {
        self.ops.push(op);
        self
    }

    /// Decode a packed update body.
    ///
    /// Space and index come back as ids. A single key comes back as a
    /// one-element [`Key::Tuple`], since both share one wire form.
    pub fn unpack(body: &[u8]) -> Result<Self> {
        let mut rd = body;
        let value = read_value(&mut rd)?;
        let entries = match value {
            Value::Map(entries) => entries,
            other => {
                return Err(IprotoError::Decode(format!(
                    "Update body is not a map: {}",
                    other
                )))
            }
        };

        let mut space = None;
        let mut index = None;
        let mut key = None;
        let mut ops = Vec::new();

        for (k, v) in entries {
            let k = k
                .as_u64()
                .and_then(|k| u8::try_from(k).ok())
                .ok_or_else(|| IprotoError::Decode(format!("Bad update body key: {}", k)))?;
            match k {
                keys::SPACE_NO => space = Some(Ident::Id(value_as_u32(&v, "Space id")?)),
                keys::INDEX_NO => index = Some(Ident::Id(value_as_u32(&v, "Index id")?)),
                keys::KEY => key = Some(Key::Tuple(into_array(v, "Key")?)),
                keys::TUPLE => {
                    for op in into_array(v, "Operators")? {
                        ops.push(Operator::from_tuple(&into_array(op, "Operator")?)?);
                    }
                }
                _ => {}
            }
        }

        Ok(Update {
            space,
            index,
            key: key.ok_or_else(|| IprotoError::Decode("Update body has no key".to_string()))?,
            ops,
        })
    }
}

fn into_array(value: Value, what: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(IprotoError::Decode(format!(
            "{} is not an array: {}",
            what, other
        ))),
    }
}

impl Query for Update {
    fn pack(&self, data: &PackData, body: &mut BytesMut) -> Result<RequestCode> {
        write_map_len(body, 4)?;

        let space_id = data.write_space(self.space.as_ref(), body)?;
        data.write_index(space_id, self.index.as_ref(), body)?;

        let parts = self.key.parts();
        write_uint(body, u64::from(keys::KEY))?;
        write_array_len(body, parts.len())?;
        for part in parts {
            write_value(body, part)?;
        }

        write_uint(body, u64::from(keys::TUPLE))?;
        write_array_len(body, self.ops.len())?;
        for op in &self.ops {
            let tuple = op.as_tuple();
            write_array_len(body, tuple.len())?;
            for value in &tuple {
                write_value(body, value)?;
            }
        }

        Ok(RequestCode::new(codes::UPDATE))
    }
}

//! Decoded responses.
//!
//! A successful response body is a map whose `DATA` entry holds an array of
//! tuples. An error response has `ERROR_FLAG` set in its code and carries a
//! message under the `ERROR` key; it is surfaced as
//! [`IprotoError::Server`].

use rmpv::Value;
use serde::de::DeserializeOwned;

use crate::codec::{read_value, MsgPackCodec};
use crate::error::{IprotoError, Result};
use crate::protocol::{codes, keys};

/// One row returned by the server.
pub type Tuple = Vec<Value>;

/// Decoded successful response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Response code (`codes::OK` for success).
    pub code: u32,
    /// Returned tuples, empty when the body carries no data.
    pub data: Vec<Tuple>,
}

impl Response {
    /// Decode a response body for the given code.
    pub fn decode(code: u32, body: &[u8]) -> Result<Self> {
        if codes::is_error(code) {
            return Err(IprotoError::Server {
                code: code & !codes::ERROR_FLAG,
                message: decode_error_message(body)?,
            });
        }

        let mut response = Response {
            code,
            data: Vec::new(),
        };
        if body.is_empty() {
            return Ok(response);
        }

        let mut rd = body;
        let value = read_value(&mut rd)?;
        let entries = match value {
            Value::Map(entries) => entries,
            other => {
                return Err(IprotoError::Decode(format!(
                    "Response body is not a map: {}",
                    other
                )))
            }
        };

        for (key, value) in entries {
            if key.as_u64() != Some(u64::from(keys::DATA)) {
                continue;
            }
            let items = match value {
                Value::Array(items) => items,
                other => {
                    return Err(IprotoError::Decode(format!(
                        "Response data is not an array: {}",
                        other
                    )))
                }
            };
            response.data = items
                .into_iter()
                .map(|item| match item {
                    Value::Array(tuple) => tuple,
                    // Scalars (e.g. results of a call) become one-field tuples
                    scalar => vec![scalar],
                })
                .collect();
        }

        Ok(response)
    }

    /// Check if the response carries no tuples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Convert every tuple into a typed value.
    ///
    /// Structs are matched positionally against tuple fields.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        self.data
            .into_iter()
            .map(|tuple| MsgPackCodec::from_value(&Value::Array(tuple)))
            .collect()
    }
}

fn decode_error_message(body: &[u8]) -> Result<String> {
    if body.is_empty() {
        return Ok(String::new());
    }

    let mut rd = body;
    let value = read_value(&mut rd)?;
    let message = value.as_map().and_then(|entries| {
        entries
            .iter()
            .find(|(k, _)| k.as_u64() == Some(u64::from(keys::ERROR)))
            .and_then(|(_, v)| v.as_str())
            .map(str::to_string)
    });

    Ok(message.unwrap_or_default())
}

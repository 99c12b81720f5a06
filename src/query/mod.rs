//! Query module - what a request looks like before it hits the wire.
//!
//! Provides:
//! - [`Query`] - the contract every request kind implements
//! - [`Update`] - modify fields of one tuple found by key
//! - [`Operator`] - a single field modification
//! - [`Ping`] - empty liveness request
//!
//! # Implementing a query
//!
//! ```
//! use bytes::BytesMut;
//! use iproto_client::{PackData, Query, Result};
//! use iproto_client::codec::{write_map_len, write_uint};
//! use iproto_client::protocol::RequestCode;
//!
//! struct Eval;
//!
//! impl Query for Eval {
//!     fn pack(&self, _data: &PackData, body: &mut BytesMut) -> Result<RequestCode> {
//!         write_map_len(body, 0)?;
//!         Ok(RequestCode::new(0x08))
//!     }
//! }
//!
//! let mut body = BytesMut::new();
//! let code = Eval.pack(&PackData::default(), &mut body).unwrap();
//! assert_eq!(code.value(), 0x08);
//! assert_eq!(&body[..], &[0x80]);
//! ```

mod operator;
mod ping;
mod update;

use bytes::BytesMut;

use crate::error::Result;
use crate::protocol::{Frame, RequestCode};
use crate::response::Response;
use crate::schema::PackData;

pub use operator::Operator;
pub use ping::Ping;
pub use update::{Key, Update};

/// A request kind.
///
/// `pack` writes the body and returns the request code. A failure there is a
/// local encoding error: nothing is sent and no correlation id stays
/// registered.
pub trait Query: Send + Sync {
    /// Write the request body into `body`.
    fn pack(&self, data: &PackData, body: &mut BytesMut) -> Result<RequestCode>;

    /// Decode the reply frame. The frame buffer is released either way.
    fn decode(&self, frame: Frame) -> Result<Response> {
        frame.decode()
    }
}

impl<Q: Query + ?Sized> Query for &Q {
    fn pack(&self, data: &PackData, body: &mut BytesMut) -> Result<RequestCode> {
        (**self).pack(data, body)
    }

    fn decode(&self, frame: Frame) -> Result<Response> {
        (**self).decode(frame)
    }
}

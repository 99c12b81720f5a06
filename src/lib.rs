//! # iproto-client
//!
//! Multiplexing client driver for the iproto binary protocol.
//!
//! Many concurrent callers share one connection. Each request carries a
//! correlation id ("sync"); a reader task matches replies back to the
//! caller waiting for them, and a writer task owns the socket's write side.
//!
//! ## Architecture
//!
//! - **Wire codec** ([`protocol`]): `0xce` length prefix, header map with
//!   code and sync, msgpack body
//! - **Buffer pool** ([`BufferPool`]): request and reply bodies are recycled
//! - **Pending registry**: correlation id to reply slot
//! - **Multiplexer** ([`Connection`]): writer task, reader task, teardown
//!
//! ## Example
//!
//! ```no_run
//! use iproto_client::{Connection, Operator, StaticSchema, Update};
//!
//! #[tokio::main]
//! async fn main() -> iproto_client::Result<()> {
//!     let conn = Connection::builder()
//!         .resolver(StaticSchema::new().space("tester", 512))
//!         .connect("127.0.0.1:3301")
//!         .await?;
//!
//!     let update = Update::new("tester", 1u32).set(Operator::assign(1, "new"));
//!     let response = conn.exec(None, &update).await?;
//!     println!("{:?}", response.data);
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod query;

mod config;
mod connection;
mod pool;
mod registry;
mod response;
mod schema;
mod writer;

pub use config::{
    ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_ID_SPACE,
    DEFAULT_WRITE_QUEUE_CAPACITY, GREETING_SIZE,
};
pub use connection::{Connection, ConnectionBuilder, ConnectionState};
pub use error::{ErrorKind, IprotoError, Result};
pub use pool::{BufferPool, PooledBuffer};
pub use query::{Key, Operator, Ping, Query, Update};
pub use registry::{reply_slot, AsyncResult};
pub use response::{Response, Tuple};
pub use schema::{Ident, PackData, SchemaResolver, StaticSchema};

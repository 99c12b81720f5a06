//! Connection configuration.

use std::time::Duration;

use crate::pool::{DEFAULT_MAX_BUFFER_CAPACITY, DEFAULT_MAX_IDLE};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Default capacity of the outgoing packet queue.
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 1024;

/// Default size of the correlation id space (the full `u32` range).
pub const DEFAULT_REQUEST_ID_SPACE: u64 = 1 << 32;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of the greeting a server sends right after accept.
pub const GREETING_SIZE: usize = 128;

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline applied to calls made without one. `None` waits forever.
    pub query_timeout: Option<Duration>,
    /// Capacity of the outgoing packet queue.
    pub write_queue_capacity: usize,
    /// Number of distinct correlation ids before the counter wraps.
    ///
    /// Small values force wraparound, which is only useful in tests.
    pub request_id_space: u64,
    /// Idle buffers kept by the connection's pool.
    pub pool_max_idle: usize,
    /// Buffers that grew past this are not pooled.
    pub pool_max_buffer_capacity: usize,
    /// Timeout for establishing the TCP connection. `None` waits forever.
    pub connect_timeout: Option<Duration>,
    /// Space used by queries that do not name one.
    pub default_space: Option<u32>,
    /// Largest reply frame accepted. A longer declared length tears the
    /// connection down without allocating.
    pub max_frame_size: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            query_timeout: None,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
            request_id_space: DEFAULT_REQUEST_ID_SPACE,
            pool_max_idle: DEFAULT_MAX_IDLE,
            pool_max_buffer_capacity: DEFAULT_MAX_BUFFER_CAPACITY,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            default_space: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

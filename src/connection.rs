//! Connection builder and multiplexer.
//!
//! The [`ConnectionBuilder`] configures and opens a connection. The
//! [`Connection`] lets any number of concurrent callers share it:
//! 1. Allocate a correlation id
//! 2. Pack the query into a pooled buffer
//! 3. Register a reply slot under the id
//! 4. Queue the packet for the writer task
//! 5. Wait for the reader task to route the reply back
//!
//! Every wait races the caller's deadline and the connection's exit signal.
//! Whichever side loses cleans up its own registry entry and buffer.
//!
//! # Example
//!
//! ```no_run
//! use iproto_client::{Connection, Operator, Update};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = Connection::builder()
//!         .query_timeout(std::time::Duration::from_secs(1))
//!         .connect("127.0.0.1:3301")
//!         .await?;
//!
//!     let update = Update::new(512u32, 1u32).set(Operator::assign(1, "new"));
//!     let rows = conn.execute(&update).await?;
//!     println!("{:?}", rows);
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ConnectionConfig, GREETING_SIZE};
use crate::error::{IprotoError, Result};
use crate::pool::BufferPool;
use crate::protocol::{read_frame_with_limit, PackedPacket, DEFAULT_BODY_CAPACITY};
use crate::query::{Ping, Query};
use crate::registry::{reply_slot, AsyncResult, PendingRegistry, PendingRequest};
use crate::response::{Response, Tuple};
use crate::schema::{PackData, SchemaResolver, StaticSchema};
use crate::writer::{exited, writer_loop, writer_queue, WriterHandle};

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Teardown in progress: new calls are refused, pending ones are failing.
    Closing,
    /// Every pending call has been failed.
    Closed,
}

impl ConnectionState {
    fn from_u8(state: u8) -> Self {
        match state {
            STATE_OPEN => ConnectionState::Open,
            STATE_CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Builder for configuring and opening a connection.
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    resolver: Arc<dyn SchemaResolver>,
    pool: Option<BufferPool>,
}

impl ConnectionBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            resolver: Arc::new(StaticSchema::new()),
            pool: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the deadline applied to calls made without one.
    ///
    /// Default: none (wait forever)
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout = Some(timeout);
        self
    }

    /// Set the outgoing queue capacity.
    ///
    /// Default: 1024
    pub fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.write_queue_capacity = capacity;
        self
    }

    /// Set how many correlation ids exist before the counter wraps.
    ///
    /// Default: 2^32
    pub fn request_id_space(mut self, space: u64) -> Self {
        self.config.request_id_space = space;
        self
    }

    /// Set the TCP connect timeout (`None` waits forever).
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the space used by queries that do not name one.
    pub fn default_space(mut self, space: u32) -> Self {
        self.config.default_space = Some(space);
        self
    }

    /// Set the largest reply frame accepted.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the resolver for space and index names.
    pub fn resolver(mut self, resolver: impl SchemaResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Use a specific buffer pool instead of one built from the config.
    pub fn buffer_pool(mut self, pool: BufferPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Open a TCP connection and start the multiplexer.
    ///
    /// This will:
    /// 1. Connect, within the connect timeout
    /// 2. Disable Nagle's algorithm
    /// 3. Read and discard the server greeting
    /// 4. Spawn the reader and writer tasks
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Connection> {
        let handshake = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;

            let mut greeting = [0u8; GREETING_SIZE];
            stream.read_exact(&mut greeting).await?;
            Ok::<_, IprotoError>(stream)
        };

        let stream = match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| IprotoError::Timeout("connect"))??,
            None => handshake.await?,
        };

        tracing::debug!(peer = ?stream.peer_addr().ok(), "Connected");
        Ok(self.start(stream))
    }

    /// Start the multiplexer over an already established stream.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start<S>(self, stream: S) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Connection::start(self, stream)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by callers and both tasks.
struct Shared {
    next_id: AtomicU64,
    id_space: u64,
    query_timeout: Option<Duration>,
    max_frame_size: u32,
    timeouts: AtomicU64,
    registry: PendingRegistry,
    pool: BufferPool,
    pack_data: PackData,
    writer: Mutex<Option<WriterHandle>>,
    state: AtomicU8,
    exit: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn next_id(&self) -> u32 {
        (self.next_id.fetch_add(1, Ordering::Relaxed) % self.id_space) as u32
    }

    fn timed_out(&self, stage: &'static str) -> IprotoError {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        IprotoError::Timeout(stage)
    }

    fn writer(&self) -> Result<WriterHandle> {
        self.writer
            .lock()
            .clone()
            .ok_or(IprotoError::ConnectionClosed)
    }

    /// Stop the connection and fail every pending call. Idempotent.
    fn teardown(&self, reason: &str) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tracing::debug!(reason, "Closing connection");

        self.writer.lock().take();
        self.exit.send_replace(true);

        let failed = self.registry.purge();
        if failed > 0 {
            tracing::debug!(failed, "Failed pending requests");
        }

        self.state.store(STATE_CLOSED, Ordering::SeqCst);
    }
}

/// Tears the connection down once the last handle is dropped.
struct Inner {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.teardown("dropped");
    }
}

/// A multiplexed connection.
///
/// Cheaply cloneable; clones share the socket and the pending registry.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connect with default configuration.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        ConnectionBuilder::new().connect(addr).await
    }

    fn start<S>(builder: ConnectionBuilder, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ConnectionBuilder {
            config,
            resolver,
            pool,
        } = builder;

        let pool = pool.unwrap_or_else(|| {
            BufferPool::with_limits(config.pool_max_idle, config.pool_max_buffer_capacity)
        });
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, queue) = writer_queue(config.write_queue_capacity);
        let (exit, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(0),
            id_space: config.request_id_space.clamp(1, 1 << 32),
            query_timeout: config.query_timeout,
            max_frame_size: config.max_frame_size,
            timeouts: AtomicU64::new(0),
            registry: PendingRegistry::new(),
            pool,
            pack_data: PackData::new(resolver, config.default_space),
            writer: Mutex::new(Some(writer)),
            state: AtomicU8::new(STATE_OPEN),
            exit,
        });

        let writer_task = {
            let shared = shared.clone();
            let exit = shared.exit.subscribe();
            tokio::spawn(async move {
                if writer_loop(queue, write_half, exit).await.is_err() {
                    shared.teardown("write failure");
                }
            })
        };

        let reader_task = {
            let shared = shared.clone();
            let exit = shared.exit.subscribe();
            tokio::spawn(async move {
                if let Err(e) = reader_loop(reader, &shared, exit).await {
                    tracing::error!("Read failed: {}", e);
                    shared.teardown("read failure");
                }
            })
        };

        tracing::debug!("Connection started");

        Connection {
            inner: Arc::new(Inner {
                shared,
                tasks: Mutex::new(vec![writer_task, reader_task]),
            }),
        }
    }

    #[inline]
    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    /// Run a query and wait for its decoded reply.
    ///
    /// `deadline` bounds both queueing and waiting. Without one, the
    /// configured query timeout applies (if any).
    ///
    /// # Errors
    ///
    /// - `Timeout("send")` if the deadline passes before the request is queued
    /// - `Timeout("recv")` if it passes while waiting for the reply
    /// - `ConnectionClosed` if the connection is or goes down
    /// - `Encode` if the query cannot be packed
    /// - `Server` / `Decode` from decoding the reply
    pub async fn exec<Q>(&self, deadline: Option<Instant>, query: &Q) -> Result<Response>
    where
        Q: Query + ?Sized,
    {
        let deadline = self.effective_deadline(deadline);
        let (reply, mut slot) = reply_slot();
        let request_id = self.send_request(deadline, query, &reply).await?;

        let mut exit = self.shared().exit.subscribe();
        let result = tokio::select! {
            biased;
            result = slot.recv() => result.unwrap_or(Err(IprotoError::ConnectionClosed)),
            _ = exited(&mut exit) => Err(IprotoError::ConnectionClosed),
            _ = sleep_until(deadline) => {
                if self.shared().registry.remove(request_id, &reply) {
                    tracing::debug!(request_id, "Request timed out");
                }
                Err(self.shared().timed_out("recv"))
            }
        };

        query.decode(result?)
    }

    /// Queue a query and return without waiting for the reply.
    ///
    /// Exactly one [`AsyncResult`] is later delivered into `reply`: the raw
    /// reply frame, or `ConnectionClosed`. The caller must read it (or drop
    /// the receiver); an unread entry stays registered until teardown.
    /// `deadline` bounds queueing only.
    pub async fn exec_async<Q>(
        &self,
        deadline: Option<Instant>,
        query: &Q,
        reply: mpsc::Sender<AsyncResult>,
    ) -> Result<()>
    where
        Q: Query + ?Sized,
    {
        let deadline = self.effective_deadline(deadline);
        self.send_request(deadline, query, &reply).await?;
        Ok(())
    }

    /// Run a query with the default deadline and return its tuples.
    pub async fn execute<Q>(&self, query: &Q) -> Result<Vec<Tuple>>
    where
        Q: Query + ?Sized,
    {
        Ok(self.exec(None, query).await?.data)
    }

    /// Round-trip an empty request.
    pub async fn ping(&self) -> Result<()> {
        self.exec(None, &Ping).await?;
        Ok(())
    }

    /// Close the connection and wait for both tasks to finish.
    ///
    /// Pending calls fail with `ConnectionClosed`. Safe to call repeatedly.
    pub async fn close(&self) {
        self.shared().teardown("closed by caller");

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared().state()
    }

    /// Check if the connection no longer accepts calls.
    pub fn is_closed(&self) -> bool {
        self.state() != ConnectionState::Open
    }

    /// Number of calls waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared().registry.len()
    }

    /// Number of calls that failed with a timeout since the connection opened.
    pub fn timeouts(&self) -> u64 {
        self.shared().timeouts.load(Ordering::Relaxed)
    }

    /// Number of packets waiting for the writer task.
    pub fn queued_requests(&self) -> usize {
        self.shared().writer().map_or(0, |writer| writer.queued())
    }

    /// The connection's buffer pool.
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.shared().pool
    }

    fn effective_deadline(&self, deadline: Option<Instant>) -> Option<Instant> {
        deadline.or_else(|| {
            self.shared()
                .query_timeout
                .map(|timeout| Instant::now() + timeout)
        })
    }

    /// Steps shared by `exec` and `exec_async`: pack, register, enqueue.
    ///
    /// On any error the registry entry (if made) is removed and the buffer
    /// released before returning.
    async fn send_request<Q>(
        &self,
        deadline: Option<Instant>,
        query: &Q,
        reply: &mpsc::Sender<AsyncResult>,
    ) -> Result<u32>
    where
        Q: Query + ?Sized,
    {
        let shared = self.shared();
        let writer = shared.writer()?;
        if deadline_elapsed(deadline) {
            return Err(shared.timed_out("send"));
        }

        let request_id = shared.next_id();
        let mut body = shared.pool.get_with_id(DEFAULT_BODY_CAPACITY, request_id);
        let code = query.pack(&shared.pack_data, body.bytes_mut())?;
        let packet = PackedPacket::new(code, body);

        if let Some(displaced) = shared
            .registry
            .put(request_id, PendingRequest::new(reply.clone()))
        {
            tracing::warn!(request_id, "Request id reused while still pending");
            displaced.deliver(Err(IprotoError::ConnectionClosed));
        }

        // Teardown may have purged between the writer check and put
        if shared.state() != ConnectionState::Open {
            shared.registry.remove(request_id, reply);
            return Err(IprotoError::ConnectionClosed);
        }

        let mut exit = shared.exit.subscribe();
        let sent = tokio::select! {
            biased;
            _ = exited(&mut exit) => Err(IprotoError::ConnectionClosed),
            _ = sleep_until(deadline) => Err(shared.timed_out("send")),
            sent = writer.send(packet) => sent,
        };

        if let Err(e) = sent {
            shared.registry.remove(request_id, reply);
            return Err(e);
        }

        tracing::trace!(request_id, code = code.value(), "Request queued");
        Ok(request_id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

/// Main read loop - reads frames and routes them to waiting callers.
async fn reader_loop<R>(mut reader: R, shared: &Shared, mut exit: watch::Receiver<bool>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = exited(&mut exit) => return Ok(()),
            frame = read_frame_with_limit(&mut reader, &shared.pool, shared.max_frame_size) => {
                frame?
            }
        };

        match shared.registry.pop(frame.request_id()) {
            Some(pending) => {
                tracing::trace!(
                    request_id = frame.request_id(),
                    elapsed = ?pending.created_at().elapsed(),
                    "Reply routed"
                );
                pending.deliver(Ok(frame));
            }
            None => {
                // Late reply to a caller that already timed out
                tracing::debug!(
                    request_id = frame.request_id(),
                    code = frame.code(),
                    "Discarding reply with no pending request"
                );
            }
        }
    }
}

fn deadline_elapsed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |deadline| Instant::now() >= deadline)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Outgoing packets and incoming frames.
//!
//! A [`PackedPacket`] is a request (or, for mock peers, a response) whose body
//! has been packed into a pooled buffer; the header is produced at write time
//! from the code and correlation id.
//!
//! A [`Frame`] is one complete incoming message read off the socket. Its
//! header has been parsed so the reader can route it by correlation id, but
//! the body is left raw: decoding is the receiving caller's job.
//!
//! # Example
//!
//! ```
//! use iproto_client::protocol::{read_frame, codes, PackedPacket};
//! use iproto_client::BufferPool;
//!
//! # tokio_test_block(async {
//! let pool = BufferPool::new(4);
//! let packet = PackedPacket::ok(&pool, 42);
//!
//! let mut wire = Vec::new();
//! packet.write_to(&mut wire).await.unwrap();
//!
//! let frame = read_frame(&mut wire.as_slice(), &pool).await.unwrap();
//! assert_eq!(frame.code(), codes::OK);
//! assert_eq!(frame.request_id(), 42);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::io::IoSlice;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{
    codes, decode_header, decode_length_prefix, keys, Header, RequestCode, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE,
};
use crate::codec::{write_map_len, write_str, write_uint};
use crate::error::{IprotoError, Result};
use crate::pool::{BufferPool, PooledBuffer};
use crate::response::Response;

/// Body of an OK response with no data: an empty map.
pub const PACKED_OK_BODY: &[u8] = &[0x80];

/// Initial body capacity for outgoing packets.
pub const DEFAULT_BODY_CAPACITY: usize = 256;

/// A packet ready to be written to the socket.
#[derive(Debug)]
pub struct PackedPacket {
    code: RequestCode,
    request_id: u32,
    body: PooledBuffer,
}

impl PackedPacket {
    /// Create a packet from a packed body.
    ///
    /// The correlation id is taken from the buffer when it carries one
    /// (see [`BufferPool::get_with_id`]), otherwise it is 0.
    pub fn new(code: impl Into<RequestCode>, body: PooledBuffer) -> Self {
        Self {
            code: code.into(),
            request_id: body.id().unwrap_or(0),
            body,
        }
    }

    /// Create a packet with an explicit correlation id.
    pub fn with_id(code: impl Into<RequestCode>, request_id: u32, body: PooledBuffer) -> Self {
        Self {
            code: code.into(),
            request_id,
            body,
        }
    }

    /// Build an OK response with an empty body map.
    pub fn ok(pool: &BufferPool, request_id: u32) -> Self {
        let mut body = pool.get_with_id(PACKED_OK_BODY.len(), request_id);
        body.bytes_mut().extend_from_slice(PACKED_OK_BODY);
        Self::new(codes::OK, body)
    }

    /// Build an error response: `ERROR_FLAG | code` with `{error: message}`.
    pub fn error(pool: &BufferPool, code: u32, request_id: u32, message: &str) -> Result<Self> {
        let mut body = pool.get_with_id(DEFAULT_BODY_CAPACITY, request_id);
        let buf = body.bytes_mut();
        write_map_len(buf, 1)?;
        write_uint(buf, u64::from(keys::ERROR))?;
        write_str(buf, message)?;
        Ok(Self::new(codes::ERROR_FLAG | code, body))
    }

    /// Get the code.
    #[inline]
    pub fn code(&self) -> RequestCode {
        self.code
    }

    /// Get the correlation id.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Get the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        self.body.bytes()
    }

    /// Header describing this packet.
    pub fn header(&self) -> Header {
        Header::new(self.code, self.request_id, self.body.len() as u32)
    }

    /// Total size on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        self.code.header_size() + self.body.len()
    }

    /// Return the body buffer to its pool. Idempotent.
    #[inline]
    pub fn release(&mut self) {
        self.body.release();
    }

    /// Write header and body fully, then flush.
    ///
    /// Uses vectored writes and resumes after partial writes; a write that
    /// makes no progress is an error.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        if self.body.is_released() {
            return Err(IprotoError::Encode("packet body already released".to_string()));
        }

        let (header, header_len) = self.header().encode();
        let header = &header[..header_len];
        let body = self.body();
        let total_size = header_len + body.len();

        let mut total_written = 0;
        while total_written < total_size {
            let slices = remaining_slices(header, body, total_written);
            let written = writer.write_vectored(&slices).await?;
            if written == 0 {
                return Err(IprotoError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write_vectored returned 0",
                )));
            }
            total_written += written;
        }

        writer.flush().await?;
        Ok(total_written)
    }
}

/// Build IoSlice array for data not yet written.
fn remaining_slices<'a>(header: &'a [u8], body: &'a [u8], skip_bytes: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);

    if skip_bytes < header.len() {
        slices.push(IoSlice::new(&header[skip_bytes..]));
    }

    let start_in_body = skip_bytes.saturating_sub(header.len());
    if start_in_body < body.len() {
        slices.push(IoSlice::new(&body[start_in_body..]));
    }

    slices
}

/// One complete incoming frame.
#[derive(Debug)]
pub struct Frame {
    code: u32,
    request_id: u32,
    schema_id: Option<u32>,
    buffer: PooledBuffer,
    body_offset: usize,
}

impl Frame {
    /// Response (or request) code.
    #[inline]
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Correlation id.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Schema version reported by the peer, if any.
    #[inline]
    pub fn schema_id(&self) -> Option<u32> {
        self.schema_id
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        codes::is_error(self.code)
    }

    /// Raw body bytes (empty once released).
    #[inline]
    pub fn body(&self) -> &[u8] {
        self.buffer.bytes().get(self.body_offset..).unwrap_or_default()
    }

    /// Return the frame buffer to its pool. Idempotent.
    #[inline]
    pub fn release(&mut self) {
        self.buffer.release();
    }

    /// Decode the body as a generic response and release the buffer.
    pub fn decode(mut self) -> Result<Response> {
        let result = Response::decode(self.code, self.body());
        self.release();
        result
    }
}

/// Read one frame of at most [`DEFAULT_MAX_FRAME_SIZE`] bytes.
///
/// Fails with [`IprotoError::Protocol`] on a bad length prefix or header map,
/// and with [`IprotoError::Io`] if the stream ends early.
pub async fn read_frame<R>(reader: &mut R, pool: &BufferPool) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    read_frame_with_limit(reader, pool, DEFAULT_MAX_FRAME_SIZE).await
}

/// Read one frame, rejecting declared lengths above `max_frame_size`.
pub async fn read_frame_with_limit<R>(
    reader: &mut R,
    pool: &BufferPool,
    max_frame_size: u32,
) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;

    let length = decode_length_prefix(&prefix, max_frame_size)? as usize;

    let mut buffer = pool.get(length);
    buffer.bytes_mut().resize(length, 0);
    // On error the buffer is dropped, which releases it
    reader.read_exact(buffer.bytes_mut()).await?;

    let header = decode_header(buffer.bytes())?;

    Ok(Frame {
        code: header.code,
        request_id: header.request_id,
        schema_id: header.schema_id,
        buffer,
        body_offset: header.size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_value;
    use std::io::Cursor;
    use tokio::io::duplex;

    fn packet(pool: &BufferPool, code: u32, id: u32, body: &[u8]) -> PackedPacket {
        let mut buf = pool.get_with_id(body.len(), id);
        buf.bytes_mut().extend_from_slice(body);
        PackedPacket::new(code, buf)
    }

    #[tokio::test]
    async fn test_roundtrip_compact() {
        let pool = BufferPool::new(4);
        let sent = packet(&pool, codes::UPDATE, 1234, &[0x81, 0x10, 0x05]);

        let mut wire = Vec::new();
        let n = sent.write_to(&mut wire).await.unwrap();
        assert_eq!(n, sent.size());
        assert_eq!(wire.len(), 14 + 3);

        let frame = read_frame(&mut wire.as_slice(), &pool).await.unwrap();
        assert_eq!(frame.code(), codes::UPDATE);
        assert_eq!(frame.request_id(), 1234);
        assert_eq!(frame.body(), &[0x81, 0x10, 0x05]);
    }

    #[tokio::test]
    async fn test_roundtrip_extended() {
        let pool = BufferPool::disabled();
        let sent = packet(&pool, 0x1_0000, u32::MAX, b"\xa3abc");

        let mut wire = Vec::new();
        sent.write_to(&mut wire).await.unwrap();
        assert_eq!(wire.len(), 18 + 4);

        let frame = read_frame(&mut wire.as_slice(), &pool).await.unwrap();
        assert_eq!(frame.code(), 0x1_0000);
        assert_eq!(frame.request_id(), u32::MAX);
        assert_eq!(frame.body(), b"\xa3abc");
    }

    #[tokio::test]
    async fn test_ok_packet() {
        let pool = BufferPool::new(4);
        let mut wire = Vec::new();
        PackedPacket::ok(&pool, 9).write_to(&mut wire).await.unwrap();

        let frame = read_frame(&mut wire.as_slice(), &pool).await.unwrap();
        assert_eq!(frame.code(), codes::OK);
        assert!(!frame.is_error());
        assert_eq!(frame.body(), PACKED_OK_BODY);

        let response = frame.decode().unwrap();
        assert!(response.data.is_empty());
    }

    #[tokio::test]
    async fn test_error_packet() {
        let pool = BufferPool::new(4);
        let packet = PackedPacket::error(&pool, 0x24, 3, "Space 'x' does not exist").unwrap();
        assert!(matches!(packet.code(), RequestCode::Extended(0x8024)));

        let mut wire = Vec::new();
        packet.write_to(&mut wire).await.unwrap();

        let frame = read_frame(&mut wire.as_slice(), &pool).await.unwrap();
        assert!(frame.is_error());

        let mut body = frame.body();
        let value = read_value(&mut body).unwrap();
        assert_eq!(value.as_map().unwrap().len(), 1);

        match frame.decode() {
            Err(IprotoError::Server { code, message }) => {
                assert_eq!(code, 0x24);
                assert_eq!(message, "Space 'x' does not exist");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_frame_wrong_marker() {
        let pool = BufferPool::new(4);
        let wire = [0xcd, 0x00, 0x00, 0x00, 0x01, 0x80];
        let err = read_frame(&mut &wire[..], &pool).await.unwrap_err();
        assert!(matches!(err, IprotoError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_frame_zero_length() {
        let pool = BufferPool::new(4);
        let wire = [0xce, 0x00, 0x00, 0x00, 0x00];
        let err = read_frame(&mut &wire[..], &pool).await.unwrap_err();
        assert!(matches!(err, IprotoError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_frame_oversize_length_rejected() {
        let pool = BufferPool::new(4);
        let wire = [0xce, 0xff, 0xff, 0xff, 0xf0];
        let err = read_frame(&mut &wire[..], &pool).await.unwrap_err();
        assert!(matches!(err, IprotoError::Protocol(_)));
        assert_eq!(pool.idle_count(), 0);

        // A tighter limit rejects an otherwise valid frame
        let mut wire = Vec::new();
        packet(&pool, codes::PING, 1, &[0u8; 32])
            .write_to(&mut wire)
            .await
            .unwrap();
        let err = read_frame_with_limit(&mut wire.as_slice(), &pool, 16)
            .await
            .unwrap_err();
        assert!(matches!(err, IprotoError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_is_transport_error() {
        let pool = BufferPool::new(4);
        let mut wire = Vec::new();
        packet(&pool, codes::PING, 1, &[0x80])
            .write_to(&mut wire)
            .await
            .unwrap();
        wire.truncate(wire.len() - 3);

        let err = read_frame(&mut wire.as_slice(), &pool).await.unwrap_err();
        assert!(matches!(err, IprotoError::Io(_)));

        // The partially filled buffer went back to the pool
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_frame_release_idempotent() {
        let pool = BufferPool::new(4);
        let mut wire = Vec::new();
        PackedPacket::ok(&pool, 1).write_to(&mut wire).await.unwrap();

        let mut frame = read_frame(&mut wire.as_slice(), &pool).await.unwrap();
        frame.release();
        frame.release();
        assert!(frame.body().is_empty());
        drop(frame);
    }

    #[tokio::test]
    async fn test_write_released_packet_fails() {
        let pool = BufferPool::new(4);
        let mut packet = PackedPacket::ok(&pool, 1);
        packet.release();

        let mut wire = Vec::new();
        assert!(packet.write_to(&mut wire).await.is_err());
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_write_through_small_pipe() {
        // A tiny duplex forces partial writes
        let (mut client, mut server) = duplex(4);
        let pool = BufferPool::new(4);
        let body = vec![0xa5u8; 100];
        let sent = packet(&pool, codes::UPDATE, 77, &body);

        let reader_pool = pool.clone();
        let reader = tokio::spawn(async move { read_frame(&mut server, &reader_pool).await });

        sent.write_to(&mut client).await.unwrap();
        let frame = reader.await.unwrap().unwrap();
        assert_eq!(frame.request_id(), 77);
        assert_eq!(frame.body(), &body[..]);
    }

    #[test]
    fn test_remaining_slices() {
        let header = [1u8; 14];
        let body = [2u8; 5];

        let slices = remaining_slices(&header, &body, 0);
        assert_eq!(slices.len(), 2);

        let slices = remaining_slices(&header, &body, 5);
        assert_eq!(slices[0].len(), 9);
        assert_eq!(slices[1].len(), 5);

        let slices = remaining_slices(&header, &body, 16);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 3);

        assert!(remaining_slices(&header, &body, 19).is_empty());
    }

    #[tokio::test]
    async fn test_write_to_cursor() {
        let pool = BufferPool::new(4);
        let mut cursor = Cursor::new(Vec::new());
        PackedPacket::with_id(codes::PING, 5, pool.get(0))
            .write_to(&mut cursor)
            .await
            .unwrap();
        assert_eq!(cursor.into_inner().len(), 14);
    }
}

//! Dedicated writer task.
//!
//! Callers never touch the socket's write half. They push packed requests
//! into a bounded queue and a single writer task drains it, so a full queue
//! is the only backpressure a caller ever sees.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<PackedPacket> ─► Writer Task ─► Socket
//! Caller N ─┘
//! ```
//!
//! Each packet is written fully (header, then body) and flushed before the
//! next one is taken. Its body buffer is released right after, whether the
//! write succeeded or not. A failed write ends the task with an error, which
//! the connection turns into teardown. A write stuck on a peer that no longer
//! reads is abandoned as soon as the exit signal fires.

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};

use crate::error::{IprotoError, Result};
use crate::protocol::PackedPacket;

/// Handle for queueing packets to the writer task.
///
/// Cheaply cloneable; every caller enqueues through its own clone.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<PackedPacket>,
}

impl WriterHandle {
    /// Queue a packet, waiting while the queue is full.
    ///
    /// If the writer is gone the packet is dropped, which releases its body.
    pub async fn send(&self, packet: PackedPacket) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| IprotoError::ConnectionClosed)
    }

    /// Number of packets waiting in the queue.
    #[inline]
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Create the bounded outgoing queue.
pub fn writer_queue(capacity: usize) -> (WriterHandle, mpsc::Receiver<PackedPacket>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (WriterHandle { tx }, rx)
}

/// Resolve once the exit signal has fired (or its sender is gone).
pub(crate) async fn exited(exit: &mut watch::Receiver<bool>) {
    let _ = exit.wait_for(|closed| *closed).await;
}

/// Main writer loop - takes packets one at a time and writes them out.
///
/// Returns `Ok(())` when the exit signal fires or every handle is dropped.
pub async fn writer_loop<W>(
    mut rx: mpsc::Receiver<PackedPacket>,
    mut writer: W,
    mut exit: watch::Receiver<bool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let mut packet = tokio::select! {
            biased;
            _ = exited(&mut exit) => return Ok(()),
            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => return Ok(()),
            },
        };

        // A peer that stops reading must not keep the task alive past exit
        let result = tokio::select! {
            biased;
            _ = exited(&mut exit) => None,
            result = packet.write_to(&mut writer) => Some(result),
        };
        packet.release();

        match result {
            None => return Ok(()),
            Some(Err(e)) => {
                tracing::error!(request_id = packet.request_id(), "Write failed: {}", e);
                return Err(e);
            }
            Some(Ok(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use crate::protocol::{codes, read_frame};
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::duplex;

    fn ping(pool: &BufferPool, id: u32) -> PackedPacket {
        PackedPacket::new(codes::PING, pool.get_with_id(0, id))
    }

    #[tokio::test]
    async fn test_packets_written_in_order() {
        let (client, mut server) = duplex(4096);
        let (_exit_tx, exit_rx) = watch::channel(false);
        let (handle, rx) = writer_queue(8);
        let task = tokio::spawn(writer_loop(rx, client, exit_rx));

        let pool = BufferPool::new(8);
        for id in 0..5 {
            handle.send(ping(&pool, id)).await.unwrap();
        }

        for id in 0..5 {
            let frame = read_frame(&mut server, &pool).await.unwrap();
            assert_eq!(frame.request_id(), id);
            assert_eq!(frame.code(), codes::PING);
        }

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_body_released_after_write() {
        let pool = BufferPool::new(8);
        let (_exit_tx, exit_rx) = watch::channel(false);
        let (handle, rx) = writer_queue(8);

        handle.send(ping(&pool, 1)).await.unwrap();
        drop(handle);

        writer_loop(rx, Cursor::new(Vec::new()), exit_rx)
            .await
            .unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_exit_signal_stops_writer() {
        let (client, _server) = duplex(64);
        let (exit_tx, exit_rx) = watch::channel(false);
        let (handle, rx) = writer_queue(8);
        let task = tokio::spawn(writer_loop(rx, client, exit_rx));

        exit_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());

        // Receiver is gone, so enqueueing fails
        let pool = BufferPool::new(8);
        let err = handle.send(ping(&pool, 1)).await.unwrap_err();
        assert!(matches!(err, IprotoError::ConnectionClosed));
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_exit_signal_interrupts_stalled_write() {
        // The peer never reads, so a 14-byte header cannot fit
        let (client, _server) = duplex(4);
        let (exit_tx, exit_rx) = watch::channel(false);
        let (handle, rx) = writer_queue(8);
        let task = tokio::spawn(writer_loop(rx, client, exit_rx));

        let pool = BufferPool::new(8);
        handle.send(ping(&pool, 1)).await.unwrap();
        tokio::task::yield_now().await;

        exit_tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("writer stuck after exit");
        assert!(result.unwrap().is_ok());
        assert_eq!(pool.idle_count(), 1);
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_failure_ends_task() {
        let pool = BufferPool::new(8);
        let (_exit_tx, exit_rx) = watch::channel(false);
        let (handle, rx) = writer_queue(8);
        handle.send(ping(&pool, 1)).await.unwrap();

        let err = writer_loop(rx, BrokenPipe, exit_rx).await.unwrap_err();
        assert!(matches!(err, IprotoError::Io(_)));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_queued_count() {
        let pool = BufferPool::new(8);
        let (handle, _rx) = writer_queue(4);
        assert_eq!(handle.queued(), 0);

        handle.tx.try_send(ping(&pool, 1)).unwrap();
        assert_eq!(handle.queued(), 1);
    }
}

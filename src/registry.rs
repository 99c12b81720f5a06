//! Pending request registry.
//!
//! Maps correlation ids to the reply slot of the caller waiting for them.
//! The map is split into shards, each behind its own mutex, so concurrent
//! callers and the reader task rarely contend.
//!
//! Every entry that goes in reaches exactly one terminal delivery: the reply
//! frame (via [`pop`](PendingRegistry::pop)), `ConnectionClosed` on
//! displacement or [`purge`](PendingRegistry::purge), or silent removal by
//! its own caller after a timeout.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{IprotoError, Result};
use crate::protocol::Frame;

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 16;

/// What a reply slot receives: the raw frame, or the reason there is none.
pub type AsyncResult = Result<Frame>;

/// Create a reply slot with room for exactly one result.
pub fn reply_slot() -> (mpsc::Sender<AsyncResult>, mpsc::Receiver<AsyncResult>) {
    mpsc::channel(1)
}

/// A caller waiting for its reply.
#[derive(Debug)]
pub struct PendingRequest {
    reply: mpsc::Sender<AsyncResult>,
    created_at: Instant,
}

impl PendingRequest {
    pub fn new(reply: mpsc::Sender<AsyncResult>) -> Self {
        Self {
            reply,
            created_at: Instant::now(),
        }
    }

    /// When the request was registered.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Check whether this entry delivers into `reply`.
    pub fn is_for(&self, reply: &mpsc::Sender<AsyncResult>) -> bool {
        self.reply.same_channel(reply)
    }

    /// Hand the result to the waiting caller without blocking.
    ///
    /// A full or closed slot means nobody will read the result; it is
    /// dropped, which releases any frame buffer it holds.
    pub fn deliver(self, result: AsyncResult) {
        match self.reply.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Reply slot full, dropping result");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Reply slot closed, dropping result");
            }
        }
    }
}

/// Sharded map of in-flight requests.
pub struct PendingRegistry {
    shards: Vec<Mutex<HashMap<u32, PendingRequest>>>,
}

impl PendingRegistry {
    /// Create a registry with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a registry with `shards` shards (at least one).
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    #[inline]
    fn shard(&self, id: u32) -> &Mutex<HashMap<u32, PendingRequest>> {
        &self.shards[id as usize % self.shards.len()]
    }

    /// Register `request` under `id`, returning the entry it displaced.
    ///
    /// The caller must deliver `ConnectionClosed` to a displaced entry.
    pub fn put(&self, id: u32, request: PendingRequest) -> Option<PendingRequest> {
        self.shard(id).lock().insert(id, request)
    }

    /// Remove and return the entry for `id`.
    pub fn pop(&self, id: u32) -> Option<PendingRequest> {
        self.shard(id).lock().remove(&id)
    }

    /// Remove the entry for `id` only if it still delivers into `reply`.
    ///
    /// Returns whether an entry was removed. A newer request that reused the
    /// id is left in place.
    pub fn remove(&self, id: u32, reply: &mpsc::Sender<AsyncResult>) -> bool {
        let mut shard = self.shard(id).lock();
        match shard.get(&id) {
            Some(entry) if entry.is_for(reply) => {
                shard.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Drain every entry and deliver `ConnectionClosed` to each.
    ///
    /// Returns the number of entries failed.
    pub fn purge(&self) -> usize {
        let mut drained = Vec::new();
        for shard in &self.shards {
            drained.extend(shard.lock().drain().map(|(_, entry)| entry));
        }

        let count = drained.len();
        for entry in drained {
            entry.deliver(Err(IprotoError::ConnectionClosed));
        }
        count
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Timestamp-ordered mutation buffer.
//!
//! Inserts and deletes are accepted immediately and buffered here until
//! a drain commits them into the native index. Per UUID the queue keeps
//! at most ONE pending operation — the latest by `(timestamp, seq)` —
//! so a rapid insert/delete/insert sequence collapses to its final
//! state before it ever touches the index.
//!
//! `seq` is an internal counter assigned at enqueue; it makes the
//! `(timestamp, seq)` order total, so two operations carrying the same
//! caller timestamp resolve deterministically (second enqueue wins).
//!
//! A drain pops everything with `timestamp <= cutoff` in one atomic
//! step; operations stamped after the cutoff stay queued and land in a
//! later drain.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::types::{Timestamp, Vector};

/// A buffered insert awaiting a drain.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedInsert {
    /// Record key.
    pub uuid: String,
    /// The vector to commit.
    pub vector: Vector,
    /// Caller timestamp (Unix nanoseconds).
    pub timestamp: Timestamp,
    /// Internal enqueue sequence number.
    pub seq: u64,
}

/// A buffered delete awaiting a drain.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedDelete {
    /// Record key.
    pub uuid: String,
    /// Caller timestamp (Unix nanoseconds).
    pub timestamp: Timestamp,
    /// Internal enqueue sequence number.
    pub seq: u64,
}

/// Mutation buffer with latest-wins-per-UUID semantics.
///
/// All operations are linearizable at the queue level. Implementations
/// must be `Send + Sync`.
pub trait MutationQueue: Send + Sync {
    /// Queues an insert.
    ///
    /// Returns false when an operation with an equal-or-newer
    /// `(timestamp, seq)` is already recorded for this UUID and the
    /// push was dropped.
    fn push_insert(&self, uuid: &str, vector: Vector, timestamp: Timestamp) -> bool;

    /// Queues a delete. Same drop rule as [`push_insert`].
    ///
    /// [`push_insert`]: MutationQueue::push_insert
    fn push_delete(&self, uuid: &str, timestamp: Timestamp) -> bool;

    /// Returns the pending insert for `uuid`, unless it has been
    /// superseded by a later delete.
    fn pending_insert(&self, uuid: &str) -> Option<QueuedInsert>;

    /// Returns the pending delete for `uuid`, if any.
    fn pending_delete(&self, uuid: &str) -> Option<QueuedDelete>;

    /// Snapshot of pending operations with `timestamp <= cutoff`, in
    /// `(timestamp, seq)` order. The queue is not modified.
    fn range_ts_le(&self, cutoff: Timestamp) -> (Vec<QueuedInsert>, Vec<QueuedDelete>);

    /// Atomically removes and returns pending operations with
    /// `timestamp <= cutoff`, in `(timestamp, seq)` order.
    fn pop_range_ts_le(&self, cutoff: Timestamp) -> (Vec<QueuedInsert>, Vec<QueuedDelete>);

    /// Number of pending inserts.
    fn insert_len(&self) -> u64;

    /// Number of pending deletes.
    fn delete_len(&self) -> u64;

    /// Returns true if nothing is pending.
    fn is_empty(&self) -> bool {
        self.insert_len() == 0 && self.delete_len() == 0
    }

    /// Releases retained capacity (proactive GC hook).
    fn shrink(&self);
}

#[derive(Debug)]
enum PendingOp {
    Insert(QueuedInsert),
    Delete(QueuedDelete),
}

impl PendingOp {
    fn timestamp(&self) -> Timestamp {
        match self {
            Self::Insert(op) => op.timestamp,
            Self::Delete(op) => op.timestamp,
        }
    }

    fn seq(&self) -> u64 {
        match self {
            Self::Insert(op) => op.seq,
            Self::Delete(op) => op.seq,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Latest pending op per UUID.
    pending: HashMap<String, PendingOp>,
    /// Total order over pending ops: `(timestamp, seq) -> uuid`.
    order: BTreeMap<(Timestamp, u64), String>,
    /// Next sequence number.
    next_seq: u64,
}

/// Default [`MutationQueue`] implementation.
///
/// A single `RwLock` guards the pending map and its order index; the
/// length counters are atomics readable without the lock.
#[derive(Debug, Default)]
pub struct VQueue {
    inner: RwLock<Inner>,
    insert_len: AtomicU64,
    delete_len: AtomicU64,
}

impl VQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any recorded op for `uuid` with `op`, unless the
    /// recorded op is equal-or-newer. Returns false on drop.
    fn push(&self, uuid: &str, op: PendingOp) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };

        let existing = inner
            .pending
            .get(uuid)
            .map(|op| (op.timestamp(), op.seq(), matches!(op, PendingOp::Insert(_))));
        if let Some((prev_ts, prev_seq, prev_is_insert)) = existing {
            // The new op always carries a fresher seq, so ties on the
            // timestamp resolve in its favor.
            if op.timestamp() < prev_ts {
                return false;
            }
            inner.order.remove(&(prev_ts, prev_seq));
            if prev_is_insert {
                self.insert_len.fetch_sub(1, Ordering::SeqCst);
            } else {
                self.delete_len.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let op = match op {
            PendingOp::Insert(mut q) => {
                q.seq = seq;
                self.insert_len.fetch_add(1, Ordering::SeqCst);
                PendingOp::Insert(q)
            }
            PendingOp::Delete(mut q) => {
                q.seq = seq;
                self.delete_len.fetch_add(1, Ordering::SeqCst);
                PendingOp::Delete(q)
            }
        };

        inner.order.insert((op.timestamp(), seq), uuid.to_string());
        inner.pending.insert(uuid.to_string(), op);
        true
    }

    /// Removes ops up to the cutoff, returning them in order.
    /// When `consume` is false the queue is left untouched.
    fn collect_range(
        &self,
        cutoff: Timestamp,
        consume: bool,
    ) -> (Vec<QueuedInsert>, Vec<QueuedDelete>) {
        let mut inserts = Vec::new();
        let mut deletes = Vec::new();
        let cutoff_key = (cutoff.saturating_add(1), 0u64);

        if consume {
            let Ok(mut inner) = self.inner.write() else {
                return (inserts, deletes);
            };
            // split_off keeps keys >= cutoff_key; what remains behind
            // is exactly the drained prefix.
            let kept = inner.order.split_off(&cutoff_key);
            let drained = std::mem::replace(&mut inner.order, kept);
            for (_, uuid) in drained {
                match inner.pending.remove(&uuid) {
                    Some(PendingOp::Insert(op)) => {
                        self.insert_len.fetch_sub(1, Ordering::SeqCst);
                        inserts.push(op);
                    }
                    Some(PendingOp::Delete(op)) => {
                        self.delete_len.fetch_sub(1, Ordering::SeqCst);
                        deletes.push(op);
                    }
                    None => {}
                }
            }
        } else {
            let Ok(inner) = self.inner.read() else {
                return (inserts, deletes);
            };
            for (_, uuid) in inner.order.range(..cutoff_key) {
                match inner.pending.get(uuid) {
                    Some(PendingOp::Insert(op)) => inserts.push(op.clone()),
                    Some(PendingOp::Delete(op)) => deletes.push(op.clone()),
                    None => {}
                }
            }
        }

        (inserts, deletes)
    }
}

impl MutationQueue for VQueue {
    fn push_insert(&self, uuid: &str, vector: Vector, timestamp: Timestamp) -> bool {
        self.push(
            uuid,
            PendingOp::Insert(QueuedInsert {
                uuid: uuid.to_string(),
                vector,
                timestamp,
                seq: 0,
            }),
        )
    }

    fn push_delete(&self, uuid: &str, timestamp: Timestamp) -> bool {
        self.push(
            uuid,
            PendingOp::Delete(QueuedDelete {
                uuid: uuid.to_string(),
                timestamp,
                seq: 0,
            }),
        )
    }

    fn pending_insert(&self, uuid: &str) -> Option<QueuedInsert> {
        let inner = self.inner.read().ok()?;
        match inner.pending.get(uuid) {
            Some(PendingOp::Insert(op)) => Some(op.clone()),
            _ => None,
        }
    }

    fn pending_delete(&self, uuid: &str) -> Option<QueuedDelete> {
        let inner = self.inner.read().ok()?;
        match inner.pending.get(uuid) {
            Some(PendingOp::Delete(op)) => Some(op.clone()),
            _ => None,
        }
    }

    fn range_ts_le(&self, cutoff: Timestamp) -> (Vec<QueuedInsert>, Vec<QueuedDelete>) {
        self.collect_range(cutoff, false)
    }

    fn pop_range_ts_le(&self, cutoff: Timestamp) -> (Vec<QueuedInsert>, Vec<QueuedDelete>) {
        self.collect_range(cutoff, true)
    }

    fn insert_len(&self) -> u64 {
        self.insert_len.load(Ordering::SeqCst)
    }

    fn delete_len(&self) -> u64 {
        self.delete_len.load(Ordering::SeqCst)
    }

    fn shrink(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.pending.shrink_to_fit();
        }
    }
}

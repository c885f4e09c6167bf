//! Drain, save, and GC algorithms.
//!
//! A drain pops every queued op with `timestamp <= now` and applies it
//! to the native index and the BidiMap: deletes first (unbind, then
//! remove the native object), then inserts (insert native, bind,
//! evict any previously bound object), then a graph build. Per-item
//! failures are logged and counted without aborting the batch; only a
//! build failure is fatal.
//!
//! A save snapshots the BidiMap (temp file + fsync + rename) and then
//! issues the native store's durable commit. The drain mutex and the
//! save mutex are separate: a save can wait out a drain without
//! blocking enqueues.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{AnnexError, Result};
use crate::kvs::save_snapshot;

use super::{Annex, Inner};

impl Annex {
    /// Drains the mutation queue into the native index, then builds.
    ///
    /// Concurrent callers serialize on the drain mutex. An empty queue
    /// short-circuits to `Ok` without counting as an execution.
    ///
    /// `pool_size` of 0 selects the configured default.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the agent is closing (the terminal drain owns
    /// the queue), `PartialDrain` when individual ops failed, or the
    /// build error.
    pub fn create_index(&self, pool_size: u32) -> Result<()> {
        if self.inner.is_closing() {
            return Err(AnnexError::Cancelled);
        }
        run_drain(&self.inner, pool_size)
    }

    /// Persists the BidiMap snapshot and the native store.
    ///
    /// No-op in memory mode. Concurrent callers serialize on the save
    /// mutex.
    pub fn save_index(&self) -> Result<()> {
        run_save(&self.inner)
    }

    /// [`create_index`](Annex::create_index) followed by
    /// [`save_index`](Annex::save_index).
    pub fn create_and_save_index(&self, pool_size: u32) -> Result<()> {
        self.create_index(pool_size)?;
        self.save_index()
    }
}

/// The drain algorithm. Shared by `create_index`, the background
/// controller, and the terminal drain in `close()`.
pub(crate) fn run_drain(inner: &Inner, pool_size: u32) -> Result<()> {
    let _guard = inner
        .cimu
        .lock()
        .map_err(|_| AnnexError::internal("drain mutex poisoned"))?;

    if inner.vqueue.is_empty() {
        debug!("Queue empty; drain is a no-op");
        return Ok(());
    }

    let pool_size = if pool_size == 0 {
        inner.config.default_pool_size
    } else {
        pool_size
    };

    inner.indexing.store(true, Ordering::SeqCst);
    let outcome = drain_locked(inner, pool_size);
    inner.indexing.store(false, Ordering::SeqCst);

    match outcome {
        Ok((insert_failures, delete_failures)) => {
            inner.create_index_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut stamp) = inner.last_drain_at.write() {
                *stamp = Some(Instant::now());
            }
            if insert_failures == 0 && delete_failures == 0 {
                Ok(())
            } else {
                Err(AnnexError::PartialDrain {
                    insert_failures,
                    delete_failures,
                })
            }
        }
        Err(e) => Err(e),
    }
}

/// Applies the popped batch. Returns per-kind failure counts; only a
/// build failure propagates as `Err`.
fn drain_locked(inner: &Inner, pool_size: u32) -> Result<(usize, usize)> {
    let cutoff = inner.now();
    let (inserts, deletes) = inner.vqueue.pop_range_ts_le(cutoff);
    info!(
        inserts = inserts.len(),
        deletes = deletes.len(),
        cutoff,
        "Draining queue into index"
    );

    let mut delete_failures = 0usize;
    for op in &deletes {
        // Unbind first: the moment the binding is gone the record is
        // logically absent, whatever the graph still holds.
        let Some(id) = inner.kvs.remove_by_uuid(&op.uuid) else {
            continue;
        };
        match inner.native.remove(id) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(uuid = %op.uuid, id, error = %e, "Failed to remove object");
                delete_failures += 1;
            }
        }
    }

    let mut insert_failures = 0usize;
    let dimension = inner.config.dimension;
    for op in &inserts {
        if op.vector.len() != dimension {
            warn!(uuid = %op.uuid, got = op.vector.len(), "Queued vector has wrong dimension");
            insert_failures += 1;
            continue;
        }
        let id = match inner.native.insert(&op.vector) {
            Ok(id) => id,
            Err(e) => {
                warn!(uuid = %op.uuid, error = %e, "Failed to insert object");
                insert_failures += 1;
                continue;
            }
        };
        if let Some(prev) = inner.kvs.insert(&op.uuid, id) {
            // A stale binding survived (e.g. a re-insert raced the
            // delete that should have preceded it). Uniqueness wins.
            match inner.native.remove(prev) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(uuid = %op.uuid, prev, error = %e, "Failed to evict replaced object");
                }
            }
        }
    }

    inner.native.build_index(pool_size)?;
    Ok((insert_failures, delete_failures))
}

/// The save algorithm. Shared by `save_index`, the background
/// controller, and `close()`.
pub(crate) fn run_save(inner: &Inner) -> Result<()> {
    let Some(dir) = inner.dir().cloned() else {
        debug!("In-memory agent; save is a no-op");
        return Ok(());
    };

    let _guard = inner
        .saving_mu
        .lock()
        .map_err(|_| AnnexError::internal("save mutex poisoned"))?;

    inner.saving.store(true, Ordering::SeqCst);
    let outcome = (|| -> Result<()> {
        // A save may not overlap a drain: holding the drain mutex for
        // the snapshot guarantees the BidiMap and the store are the
        // same generation. A save that arrives mid-drain waits here
        // (the IndexingAndSaving window).
        let _drain_guard = inner
            .cimu
            .lock()
            .map_err(|_| AnnexError::internal("drain mutex poisoned"))?;
        save_snapshot(inner.kvs.as_ref(), &dir)?;
        inner.native.save()?;
        Ok(())
    })();
    inner.saving.store(false, Ordering::SeqCst);

    match outcome {
        Ok(()) => {
            inner
                .saved_create_index_count
                .store(inner.create_index_count.load(Ordering::SeqCst), Ordering::SeqCst);
            if let Ok(mut stamp) = inner.last_save_at.write() {
                *stamp = Some(Instant::now());
            }
            info!(committed = inner.kvs.len(), "Index saved");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Proactive GC: release retained capacity and count the execution.
pub(crate) fn run_gc(inner: &Inner) {
    inner.vqueue.shrink();
    inner.native.shrink();
    inner.proactive_gc_count.fetch_add(1, Ordering::SeqCst);
    inner
        .gc_create_index_count
        .store(inner.create_index_count.load(Ordering::SeqCst), Ordering::SeqCst);
    debug!("Proactive GC executed");
}

//! The agent: public handle, state machine, and lifecycle.
//!
//! [`Annex`] owns the native index, the BidiMap, and the mutation
//! queue, and exposes the user-facing operations. Mutations are
//! buffered in the queue; a background controller (or an explicit
//! `create_index` call) drains them into the native index, and saves
//! persist everything to the index directory.
//!
//! Submodules:
//! - `ops` — insert / update / upsert / delete (single and multi),
//!   exists, get_object
//! - `search` — search and search-by-id with the pending-mutation
//!   read rules
//! - `index` — the drain, save, and GC algorithms
//! - `controller` — the background tick loop
//!
//! # Thread Safety
//!
//! `Annex` is `Send + Sync`; share it across threads with `Arc`. All
//! operations take `&self` — state lives behind the agent's internal
//! locks and atomics.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use annex::{Annex, Config};
//!
//! let agent = Arc::new(Annex::open(Config::in_memory(128))?);
//! let agent2 = Arc::clone(&agent);
//! std::thread::spawn(move || {
//!     agent2.insert("doc-1", vec![0.0; 128]).unwrap();
//! });
//! ```

mod controller;
mod index;
mod ops;
mod search;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{AnnexError, Result};
use crate::kvs::{BidiMap, ShardedBidiMap};
use crate::native::NativeIndex;
use crate::types::{IndexStats, MonotonicClock, Timestamp};
use crate::vqueue::{MutationQueue, VQueue};

use controller::ControllerHandle;

/// Lifecycle phase values for `Inner::phase`.
const PHASE_INITIALIZING: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_CLOSING: u8 = 2;

/// Externally observable agent state.
///
/// Derived from the lifecycle phase plus the two in-progress flags;
/// `Indexing` and `Saving` compose when a drain and a save overlap in
/// wall time (the save is waiting on the drain, never running inside
/// it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    /// Opened but `start()` has not been called.
    Initializing,
    /// Serving traffic; no drain or save in flight.
    Running,
    /// A drain is in progress.
    Indexing,
    /// A save is in progress.
    Saving,
    /// Both flags are up.
    IndexingAndSaving,
    /// `close()` has begun; mutations are rejected.
    Closing,
}

/// Shared agent state. The public handle and the background controller
/// both hold an `Arc` of this.
pub(crate) struct Inner {
    pub(crate) config: Config,
    pub(crate) native: NativeIndex,
    pub(crate) kvs: Box<dyn BidiMap>,
    pub(crate) vqueue: Box<dyn MutationQueue>,
    pub(crate) clock: MonotonicClock,

    /// Lifecycle phase (`PHASE_*`).
    pub(crate) phase: AtomicU8,
    /// True while a drain is running.
    pub(crate) indexing: AtomicBool,
    /// True while a save is running.
    pub(crate) saving: AtomicBool,

    /// Serializes drains. Concurrent `create_index` callers block here.
    pub(crate) cimu: Mutex<()>,
    /// Serializes saves.
    pub(crate) saving_mu: Mutex<()>,

    /// Completed drain executions.
    pub(crate) create_index_count: AtomicU64,
    /// Completed proactive GC executions.
    pub(crate) proactive_gc_count: AtomicU64,
    /// Drain count as of the last save (the controller's save trigger).
    pub(crate) saved_create_index_count: AtomicU64,
    /// Drain count as of the last GC.
    pub(crate) gc_create_index_count: AtomicU64,

    /// When the last drain finished.
    pub(crate) last_drain_at: RwLock<Option<Instant>>,
    /// When the last save finished.
    pub(crate) last_save_at: RwLock<Option<Instant>>,
}

impl Inner {
    /// Directory for persisted state; `None` in memory mode.
    pub(crate) fn dir(&self) -> Option<&PathBuf> {
        if self.config.in_memory_mode {
            None
        } else {
            self.config.path.as_ref()
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == PHASE_CLOSING
    }

    /// Current timestamp from the agent's monotonic clock.
    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

/// The main agent handle.
///
/// Create with [`Annex::open`], optionally launch the background
/// controller with [`Annex::start`], and shut down with
/// [`Annex::close`] (which consumes the handle after a final drain
/// and save).
pub struct Annex {
    inner: Arc<Inner>,
    controller: Mutex<Option<ControllerHandle>>,
}

impl std::fmt::Debug for Annex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annex")
            .field("dimension", &self.inner.config.dimension)
            .field("len", &self.inner.kvs.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Annex {
    /// Opens or creates an agent from the given configuration.
    ///
    /// For an on-disk agent this loads `kvs.snap` (if present) and the
    /// native store, rebuilding the search graph from stored vectors.
    /// The rebuild is bounded by the configured load timeout, scaled
    /// by the number of committed entries.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration is invalid (see [`Config::validate`])
    /// - The snapshot is corrupt (magic/version/checksum)
    /// - The store was created with a different dimension, metric, or
    ///   object type
    /// - Loading exceeds the computed timeout
    #[instrument(skip(config), fields(dimension = config.dimension))]
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        info!(in_memory = config.in_memory_mode, "Opening agent");

        let kvs: Box<dyn BidiMap> = match config.path.as_ref().filter(|_| !config.in_memory_mode) {
            Some(dir) => Box::new(ShardedBidiMap::load_from_dir(dir)?),
            None => Box::new(ShardedBidiMap::new()),
        };

        let native = Self::open_native(&config, kvs.len())?;

        info!(
            committed = kvs.len(),
            dimension = config.dimension,
            distance = ?config.distance,
            "Agent opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                native,
                kvs,
                vqueue: Box::new(VQueue::new()),
                clock: MonotonicClock::new(),
                phase: AtomicU8::new(PHASE_INITIALIZING),
                indexing: AtomicBool::new(false),
                saving: AtomicBool::new(false),
                cimu: Mutex::new(()),
                saving_mu: Mutex::new(()),
                create_index_count: AtomicU64::new(0),
                proactive_gc_count: AtomicU64::new(0),
                saved_create_index_count: AtomicU64::new(0),
                gc_create_index_count: AtomicU64::new(0),
                last_drain_at: RwLock::new(None),
                last_save_at: RwLock::new(None),
            }),
            controller: Mutex::new(None),
        })
    }

    /// Opens the native index on a helper thread, bounded by the
    /// entry-count-scaled load timeout.
    fn open_native(config: &Config, committed: u64) -> Result<NativeIndex> {
        let timeout = config
            .load_index_timeout_factor
            .saturating_mul(committed.min(u64::from(u32::MAX)) as u32)
            .clamp(config.min_load_index_timeout, config.max_load_index_timeout);

        let (tx, rx) = mpsc::channel();
        let thread_config = config.clone();
        let dir = config
            .path
            .clone()
            .filter(|_| !config.in_memory_mode);
        std::thread::spawn(move || {
            let result = NativeIndex::open(dir.as_deref(), &thread_config);
            // The receiver is gone if the load timed out.
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "Index load timed out");
                Err(AnnexError::internal(format!(
                    "index load exceeded timeout of {:?}",
                    timeout
                )))
            }
        }
    }

    /// Launches the background controller.
    ///
    /// The controller ticks on `auto_index_check_duration`, draining
    /// the queue, saving the index, and running proactive GC per the
    /// configured thresholds. Errors from background work surface on
    /// the returned channel; each is non-fatal at the type level — the
    /// caller decides whether to terminate.
    ///
    /// # Errors
    ///
    /// Returns [`AnnexError::AlreadyRunning`] on a second call and
    /// [`AnnexError::Cancelled`] if the agent is closing.
    pub fn start(&self) -> Result<mpsc::Receiver<AnnexError>> {
        let mut slot = self
            .controller
            .lock()
            .map_err(|_| AnnexError::internal("controller slot lock poisoned"))?;
        if slot.is_some() {
            return Err(AnnexError::AlreadyRunning);
        }
        if self.inner.is_closing() {
            return Err(AnnexError::Cancelled);
        }

        let (err_tx, err_rx) = mpsc::channel();
        let handle = controller::spawn(Arc::clone(&self.inner), err_tx)?;
        *slot = Some(handle);
        self.inner.phase.store(PHASE_RUNNING, Ordering::SeqCst);

        info!("Background controller started");
        Ok(err_rx)
    }

    /// Closes the agent: stops the controller, runs a final drain and
    /// save (skipped in memory mode), and consumes the handle.
    ///
    /// Mutations arriving after `close()` begins are rejected with
    /// [`AnnexError::FlushingIndex`].
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing agent");
        self.inner.phase.store(PHASE_CLOSING, Ordering::SeqCst);

        if let Ok(mut slot) = self.controller.lock() {
            if let Some(handle) = slot.take() {
                handle.stop();
            }
        }

        if !self.inner.config.in_memory_mode {
            // Terminal drain: everything enqueued before close lands.
            if let Err(e) = index::run_drain(&self.inner, self.inner.config.default_pool_size) {
                warn!(error = %e, "Final drain reported failures");
            }
            index::run_save(&self.inner)?;
        }

        info!("Agent closed");
        Ok(())
    }

    /// Number of committed records.
    pub fn len(&self) -> u64 {
        self.inner.kvs.len()
    }

    /// Returns true if nothing is committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued inserts.
    pub fn insert_vqueue_len(&self) -> u64 {
        self.inner.vqueue.insert_len()
    }

    /// Number of queued deletes.
    pub fn delete_vqueue_len(&self) -> u64 {
        self.inner.vqueue.delete_len()
    }

    /// The configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.inner.native.dimension()
    }

    /// All committed UUIDs, snapshotted at call time.
    pub fn uuids(&self) -> Vec<String> {
        self.inner.kvs.uuids()
    }

    /// True while a drain is in progress.
    pub fn is_indexing(&self) -> bool {
        self.inner.indexing.load(Ordering::SeqCst)
    }

    /// True while a save is in progress.
    pub fn is_saving(&self) -> bool {
        self.inner.saving.load(Ordering::SeqCst)
    }

    /// Completed drain executions.
    pub fn create_index_count(&self) -> u64 {
        self.inner.create_index_count.load(Ordering::SeqCst)
    }

    /// Completed proactive GC executions.
    pub fn proactive_gc_count(&self) -> u64 {
        self.inner.proactive_gc_count.load(Ordering::SeqCst)
    }

    /// Current externally observable state.
    pub fn state(&self) -> AgentState {
        match self.inner.phase.load(Ordering::SeqCst) {
            PHASE_INITIALIZING => AgentState::Initializing,
            PHASE_CLOSING => AgentState::Closing,
            _ => match (self.is_indexing(), self.is_saving()) {
                (true, true) => AgentState::IndexingAndSaving,
                (true, false) => AgentState::Indexing,
                (false, true) => AgentState::Saving,
                (false, false) => AgentState::Running,
            },
        }
    }

    /// Point-in-time snapshot of the index state.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            committed: self.len(),
            stored: self.inner.native.live_count().unwrap_or(0),
            queued_inserts: self.insert_vqueue_len(),
            queued_deletes: self.delete_vqueue_len(),
            indexing: self.is_indexing(),
            saving: self.is_saving(),
            create_index_count: self.create_index_count(),
            proactive_gc_count: self.proactive_gc_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_agent(dimension: usize) -> Annex {
        Annex::open(Config::in_memory(dimension)).unwrap()
    }

    #[test]
    fn test_open_starts_initializing() {
        let agent = in_memory_agent(4);
        assert_eq!(agent.state(), AgentState::Initializing);
        assert_eq!(agent.len(), 0);
        assert!(agent.is_empty());
        assert_eq!(agent.dimension(), 4);
    }

    #[test]
    fn test_start_transitions_to_running() {
        let agent = in_memory_agent(4);
        let _errors = agent.start().unwrap();
        assert_eq!(agent.state(), AgentState::Running);
        assert!(!agent.is_indexing());
        assert!(!agent.is_saving());
        agent.close().unwrap();
    }

    #[test]
    fn test_double_start_is_rejected() {
        let agent = in_memory_agent(4);
        let _errors = agent.start().unwrap();
        let err = agent.start().unwrap_err();
        assert!(matches!(err, AnnexError::AlreadyRunning));
        agent.close().unwrap();
    }

    #[test]
    fn test_stats_reflect_queue() {
        let agent = in_memory_agent(2);
        agent.insert("a", vec![1.0, 0.0]).unwrap();
        agent.insert("b", vec![0.0, 1.0]).unwrap();
        agent.delete_with_time("a", agent.inner.now()).unwrap();

        let stats = agent.stats();
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.queued_inserts, 1);
        assert_eq!(stats.queued_deletes, 1);
        assert!(!stats.indexing);
        assert_eq!(stats.create_index_count, 0);
    }

    #[test]
    fn test_invalid_config_rejected_at_open() {
        let err = Annex::open(Config::in_memory(0)).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_close_without_start() {
        let agent = in_memory_agent(4);
        agent.insert("a", vec![0.0; 4]).unwrap();
        agent.close().unwrap();
    }
}

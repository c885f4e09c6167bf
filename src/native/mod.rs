//! The native ANN index: HNSW graph over durable vector storage.
//!
//! This is the narrow façade the agent drives: insert-returning-id,
//! remove-by-id, search, get-vector, build, save. Everything else in
//! the crate treats these as the only entry points.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │           NativeIndex             │
//! │  ┌─────────────┐ ┌─────────────┐ │
//! │  │ HNSW graph  │ │ VectorStore │ │
//! │  │ (derived)   │ │ (redb,      │ │
//! │  │             │ │  source of  │ │
//! │  │             │ │  truth)     │ │
//! │  └─────────────┘ └─────────────┘ │
//! └──────────────────────────────────┘
//! ```
//!
//! The graph is rebuilt from stored vectors on open and on tombstone
//! compaction; graph dump files are never loaded. Removed ids become
//! tombstones, filtered from searches until `build_index` rebuilds the
//! graph without them and reclaims their ids into the free list —
//! internal ids are reused only after a rebuild.
//!
//! # Thread Safety
//!
//! Writes (`insert`, `remove`, `build_index`, `save`) are exclusive
//! behind a writer mutex. Searches and `get_vector` run concurrently
//! with each other and with saves; the graph `RwLock` serializes them
//! against rebuilds. Lock order is graph before state everywhere both
//! are held.

mod store;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use hnsw_rs::prelude::*;
use tracing::{debug, info};

use crate::config::{Config, DistanceMetric, GraphConfig, ObjectType};
use crate::error::{AnnexError, Result, ValidationError};
use crate::types::InternalId;

use store::{StoreMetadata, VectorStore};

type Graph = Hnsw<'static, f32, DistPtr<f32, f32>>;

/// Mutable id bookkeeping: which ids are dead-but-indexed, which are
/// available for reuse, and the high-water mark.
#[derive(Debug, Default)]
struct NativeState {
    /// Removed ids still present in the graph until the next build.
    tombstones: HashSet<InternalId>,
    /// Ids reclaimed by past builds, available for reuse.
    free_ids: Vec<InternalId>,
    /// Next never-assigned id.
    next_id: InternalId,
}

/// The native ANN index.
pub(crate) struct NativeIndex {
    /// The derived HNSW graph. Swapped wholesale by `build_index`.
    graph: RwLock<Graph>,

    /// Durable vector storage (the source of truth).
    store: VectorStore,

    /// Tombstone / free-list / next-id bookkeeping.
    state: RwLock<NativeState>,

    /// Writer exclusion: insert, remove, build, and save are mutually
    /// exclusive; searches never take it.
    write_mu: Mutex<()>,

    dimension: usize,
    metric: DistanceMetric,
    object_type: ObjectType,
    graph_config: GraphConfig,
}

impl NativeIndex {
    /// Opens or creates the index.
    ///
    /// `dir` of `None` selects the in-memory store backend. For an
    /// existing store the graph is rebuilt from stored vectors (bulk
    /// parallel insertion).
    pub(crate) fn open(dir: Option<&Path>, config: &Config) -> Result<Self> {
        let (store, metadata) = VectorStore::open(dir, config)?;

        let vectors = store.load_all()?;
        let graph = Self::new_graph(&config.hnsw, config.distance, vectors.len());
        if !vectors.is_empty() {
            let batch: Vec<(&Vec<f32>, usize)> = vectors
                .iter()
                .map(|(id, vector)| (vector, *id as usize))
                .collect();
            graph.parallel_insert(&batch);
            info!(vectors = vectors.len(), "Rebuilt graph from vector store");
        }

        // Reconcile the saved id bookkeeping against the table: the
        // metadata snapshot can lag the vectors table by one crash.
        let last = store.last_id()?;
        let next_id = match last {
            Some(last) => metadata.next_id.max(last.saturating_add(1)),
            None => metadata.next_id,
        };
        let mut free_ids = Vec::with_capacity(metadata.free_ids.len());
        for id in metadata.free_ids {
            if id < next_id && !store.contains(id)? {
                free_ids.push(id);
            }
        }

        Ok(Self {
            graph: RwLock::new(graph),
            store,
            state: RwLock::new(NativeState {
                tombstones: HashSet::new(),
                free_ids,
                next_id,
            }),
            write_mu: Mutex::new(()),
            dimension: config.dimension,
            metric: config.distance,
            object_type: config.object_type,
            graph_config: config.hnsw.clone(),
        })
    }

    fn new_graph(config: &GraphConfig, metric: DistanceMetric, capacity: usize) -> Graph {
        Hnsw::new(
            config.max_nb_connection,
            config.max_elements.max(capacity),
            config.max_layer,
            config.ef_construction,
            DistPtr::new(metric.eval_fn()),
        )
    }

    /// Stores and indexes a vector, returning its assigned id.
    ///
    /// Writer-exclusive; do not call concurrently with other writers.
    pub(crate) fn insert(&self, vector: &[f32]) -> Result<InternalId> {
        if vector.len() != self.dimension {
            return Err(ValidationError::dimension_mismatch(self.dimension, vector.len()).into());
        }

        let _writer = self
            .write_mu
            .lock()
            .map_err(|_| AnnexError::internal("native writer lock poisoned"))?;

        let id = {
            let mut state = self
                .state
                .write()
                .map_err(|_| AnnexError::internal("native state lock poisoned"))?;
            match state.free_ids.pop() {
                Some(id) => id,
                None => {
                    if state.next_id == InternalId::MAX {
                        return Err(AnnexError::ResourceExhausted(
                            "internal id space exhausted".to_string(),
                        ));
                    }
                    let id = state.next_id;
                    state.next_id += 1;
                    id
                }
            }
        };

        self.store.put(id, vector)?;

        let graph = self
            .graph
            .read()
            .map_err(|_| AnnexError::internal("native graph lock poisoned"))?;
        graph.insert((vector, id as usize));

        Ok(id)
    }

    /// Removes the vector under `id`.
    ///
    /// The graph keeps the point as a tombstone (excluded from search)
    /// until the next `build_index`. Returns `NotFound` for an unknown
    /// id.
    pub(crate) fn remove(&self, id: InternalId) -> Result<()> {
        let _writer = self
            .write_mu
            .lock()
            .map_err(|_| AnnexError::internal("native writer lock poisoned"))?;

        if !self.store.remove(id)? {
            return Err(AnnexError::not_found(id.to_string()));
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| AnnexError::internal("native state lock poisoned"))?;
        state.tombstones.insert(id);
        Ok(())
    }

    /// Searches for the `k` nearest live vectors.
    ///
    /// `epsilon` widens the candidate pool beyond the configured
    /// `ef_search`; a non-negative `radius` caps result distance.
    /// Returns `(id, distance)` pairs sorted by distance ascending.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        epsilon: f32,
        radius: f32,
    ) -> Result<Vec<(InternalId, f32)>> {
        if query.len() != self.dimension {
            return Err(ValidationError::dimension_mismatch(self.dimension, query.len()).into());
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let graph = self
            .graph
            .read()
            .map_err(|_| AnnexError::internal("native graph lock poisoned"))?;
        let state = self
            .state
            .read()
            .map_err(|_| AnnexError::internal("native state lock poisoned"))?;

        let ef = self
            .graph_config
            .ef_search
            .max((k as f32 * (1.0 + epsilon.max(0.0))).ceil() as usize);

        let tombstones = &state.tombstones;
        let filter_fn = |id: &usize| -> bool { !tombstones.contains(&(*id as InternalId)) };
        let neighbours = if tombstones.is_empty() {
            graph.search(query, k, ef)
        } else {
            graph.search_filter(query, k, ef, Some(&filter_fn))
        };

        let mut results: Vec<(InternalId, f32)> = neighbours
            .into_iter()
            .map(|n| (n.d_id as InternalId, n.distance))
            .filter(|(_, distance)| radius < 0.0 || *distance <= radius)
            .collect();
        results.truncate(k);
        Ok(results)
    }

    /// Reads the stored vector for `id`.
    pub(crate) fn get_vector(&self, id: InternalId) -> Result<Vec<f32>> {
        self.store
            .get(id)?
            .ok_or_else(|| AnnexError::not_found(id.to_string()))
    }

    /// Compacts tombstones by rebuilding the graph from live vectors.
    ///
    /// No-op when there are no tombstones: points index incrementally
    /// on insert, so a build only has reclamation work. The rebuild
    /// runs in a dedicated thread pool of `pool_size` threads against
    /// a fresh graph; searches keep using the old graph and block only
    /// for the swap (graph write lock).
    pub(crate) fn build_index(&self, pool_size: u32) -> Result<()> {
        let _writer = self
            .write_mu
            .lock()
            .map_err(|_| AnnexError::internal("native writer lock poisoned"))?;

        {
            let state = self
                .state
                .read()
                .map_err(|_| AnnexError::internal("native state lock poisoned"))?;
            if state.tombstones.is_empty() {
                debug!("No tombstones; skipping graph rebuild");
                return Ok(());
            }
        }

        let vectors = self.store.load_all()?;
        let rebuilt = Self::new_graph(&self.graph_config, self.metric, vectors.len());
        if !vectors.is_empty() {
            let batch: Vec<(&Vec<f32>, usize)> = vectors
                .iter()
                .map(|(id, vector)| (vector, *id as usize))
                .collect();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(pool_size.max(1) as usize)
                .build()
                .map_err(|e| AnnexError::internal(format!("build pool: {}", e)))?;
            pool.install(|| rebuilt.parallel_insert(&batch));
        }

        let mut graph = self
            .graph
            .write()
            .map_err(|_| AnnexError::internal("native graph lock poisoned"))?;
        let mut state = self
            .state
            .write()
            .map_err(|_| AnnexError::internal("native state lock poisoned"))?;
        *graph = rebuilt;
        let state = &mut *state;
        state.free_ids.extend(state.tombstones.drain());
        state.free_ids.sort_unstable();
        info!(
            live = vectors.len(),
            reclaimed = state.free_ids.len(),
            "Rebuilt graph; tombstones reclaimed"
        );
        Ok(())
    }

    /// Persists the store (durable commit) with current id bookkeeping.
    ///
    /// Exclusive with writers and builds; concurrent searches are fine.
    pub(crate) fn save(&self) -> Result<()> {
        let _writer = self
            .write_mu
            .lock()
            .map_err(|_| AnnexError::internal("native writer lock poisoned"))?;

        let metadata = {
            let state = self
                .state
                .read()
                .map_err(|_| AnnexError::internal("native state lock poisoned"))?;
            StoreMetadata {
                schema_version: store::STORE_SCHEMA_VERSION,
                dimension: self.dimension,
                distance: self.metric,
                object_type: self.object_type,
                next_id: state.next_id,
                free_ids: state.free_ids.clone(),
            }
        };
        self.store.persist(&metadata)?;
        Ok(())
    }

    /// The dimension this index was opened with.
    pub(crate) fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live (stored) vectors.
    pub(crate) fn live_count(&self) -> Result<u64> {
        self.store.len()
    }

    /// Releases retained capacity in the id bookkeeping (GC hook).
    pub(crate) fn shrink(&self) {
        if let Ok(mut state) = self.state.write() {
            state.tombstones.shrink_to_fit();
            state.free_ids.shrink_to_fit();
        }
    }
}

//! # Annex
//!
//! Embedded ANN vector agent - a single-process index over
//! fixed-dimension float vectors keyed by opaque string UUIDs.
//!
//! Annex serves concurrent read traffic (search by vector or by id,
//! exists, get) while absorbing mutation traffic (insert / update /
//! delete) into a timestamp-ordered queue that is periodically drained
//! into the native HNSW index and persisted to disk.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use annex::{Annex, Config};
//!
//! // Open or create an agent
//! let agent = Annex::open(Config::on_disk("./index", 4))?;
//!
//! // Launch the background drain/save controller
//! let errors = agent.start()?;
//!
//! // Mutations are buffered...
//! agent.insert("a", vec![1.0, 0.0, 0.0, 0.0])?;
//! agent.insert("b", vec![0.0, 1.0, 0.0, 0.0])?;
//!
//! // ...and become searchable after a drain
//! agent.create_index(8)?;
//! let hits = agent.search(&[1.0, 0.0, 0.0, 0.0], 2, None, None)?;
//! assert_eq!(hits[0].uuid, "a");
//!
//! // Drain once more, save, and shut down
//! agent.close()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### UUID and internal id
//!
//! Callers key records by opaque strings ("UUIDs"). The native index
//! assigns each committed record a numeric internal id; the agent's
//! bidirectional map bridges the two and is the authoritative record
//! of what is committed.
//!
//! ### The mutation queue
//!
//! Mutations are accepted immediately and buffered. Per UUID only the
//! latest operation (by timestamp) survives; a drain pops everything
//! up to a cutoff and applies it in timestamp order. Reads combine the
//! committed index with the pending queue, so a delete masks its
//! record the moment it is accepted.
//!
//! ### Drains and saves
//!
//! `create_index` drains the queue and builds the graph; `save_index`
//! persists the map snapshot and the vector store. The background
//! controller started by [`Annex::start`] does both on configurable
//! thresholds.
//!
//! ## Thread Safety
//!
//! [`Annex`] is `Send + Sync` and can be shared across threads using
//! `Arc`. Reads run concurrently; drains, saves, and native writes are
//! serialized internally.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// Module declarations
// ============================================================================

mod agent;
mod config;
mod distance;
mod error;
mod kvs;
mod native;
mod types;
mod vqueue;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main agent interface
pub use agent::{AgentState, Annex};

// Configuration
pub use config::{Config, DistanceMetric, GraphConfig, ObjectType, MAX_DIMENSION, MAX_UUID_LEN};

// Error handling
pub use error::{AnnexError, Result, SnapshotError, ValidationError};

// Core types
pub use types::{IndexStats, InternalId, Neighbor, Timestamp, Vector};

// Queue types surfaced through the trait seams
pub use kvs::{BidiMap, ShardedBidiMap};
pub use vqueue::{MutationQueue, QueuedDelete, QueuedInsert, VQueue};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common Annex usage.
///
/// ```rust
/// use annex::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{AgentState, Annex};
    pub use crate::config::{Config, DistanceMetric, ObjectType};
    pub use crate::error::{AnnexError, Result};
    pub use crate::types::{IndexStats, Neighbor};
}

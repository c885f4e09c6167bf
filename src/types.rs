//! Core type definitions for Annex identifiers, timestamps, and results.
//!
//! UUIDs in Annex are opaque caller-chosen strings — the agent never
//! generates or interprets them. Internal ids are the `u32` handles the
//! native index assigns on insert.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::MAX_UUID_LEN;
use crate::error::ValidationError;

/// Numeric handle assigned by the native index.
///
/// Unique for the life of a record inside the index; reused only after
/// a rebuild reclaims tombstones.
pub type InternalId = u32;

/// Unix timestamp in nanoseconds.
///
/// Mutations are totally ordered by `(timestamp, seq)`; callers may
/// supply their own timestamps to time-travel relative to each other.
pub type Timestamp = i64;

/// Vector type alias. Fixed dimension, all components finite.
pub type Vector = Vec<f32>;

/// A single search result: the matched UUID and its distance from the
/// query under the configured metric (smaller is closer).
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    /// UUID of the matched record.
    pub uuid: String,
    /// Distance from the query vector.
    pub distance: f32,
}

/// Point-in-time snapshot of the agent's index state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Committed records (BidiMap length).
    pub committed: u64,
    /// Vectors held by the native store. Normally equals `committed`;
    /// diverges only after a partial recovery.
    pub stored: u64,
    /// Pending queued inserts.
    pub queued_inserts: u64,
    /// Pending queued deletes.
    pub queued_deletes: u64,
    /// True while a drain is running.
    pub indexing: bool,
    /// True while a save is running.
    pub saving: bool,
    /// Completed drain executions.
    pub create_index_count: u64,
    /// Completed proactive GC executions.
    pub proactive_gc_count: u64,
}

/// Monotonic wall-clock source for mutation timestamps.
///
/// Wall-clock readings are folded through an atomic max so two calls
/// never observe a decreasing value even if the system clock steps
/// backwards.
#[derive(Debug)]
pub(crate) struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub(crate) fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Returns the current timestamp in Unix nanoseconds, strictly
    /// greater than any previously returned value.
    pub(crate) fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(if wall > last {
                    wall
                } else {
                    last.saturating_add(1)
                })
            })
            .unwrap_or(0);
        if wall > prev {
            wall
        } else {
            prev.saturating_add(1)
        }
    }
}

/// Validates a caller-supplied UUID.
pub(crate) fn validate_uuid(uuid: &str) -> Result<(), ValidationError> {
    if uuid.is_empty() {
        return Err(ValidationError::EmptyUuid);
    }
    if uuid.len() > MAX_UUID_LEN {
        return Err(ValidationError::UuidTooLong {
            got: uuid.len(),
            max: MAX_UUID_LEN,
        });
    }
    Ok(())
}

/// Validates a caller-supplied vector against the agent dimension.
pub(crate) fn validate_vector(vector: &[f32], dimension: usize) -> Result<(), ValidationError> {
    if vector.len() != dimension {
        return Err(ValidationError::dimension_mismatch(dimension, vector.len()));
    }
    for (index, component) in vector.iter().enumerate() {
        if !component.is_finite() {
            return Err(ValidationError::NonFiniteComponent { index });
        }
    }
    Ok(())
}

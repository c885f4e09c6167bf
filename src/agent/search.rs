//! Search operations and the committed-plus-pending read rules.
//!
//! Raw ANN results come from the committed index only. Before they are
//! returned they pass through, in order:
//!
//! 1. id → UUID translation via the BidiMap; hits whose id has no
//!    binding are dropped (already removed from the logical view even
//!    if the graph holds them until the next build).
//! 2. Hits whose UUID has a pending delete (timestamp `<=` now) are
//!    dropped.
//! 3. For search-by-id the query vector itself honors the queue:
//!    a queued insert wins over the committed vector.
//!
//! Queued inserts are NOT spliced into result lists — they become
//! searchable at the next drain.

use crate::error::Result;
use crate::types::{validate_vector, Neighbor, Vector};

use super::Annex;

impl Annex {
    /// Searches for the `k` nearest committed records.
    ///
    /// `epsilon` (exploration slack) and `radius` (distance cap,
    /// negative = unbounded) fall back to the configured defaults when
    /// `None`. `k == 0` returns an empty result.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on a dimension mismatch or non-finite query
    /// component.
    pub fn search(
        &self,
        vector: &[f32],
        k: usize,
        epsilon: Option<f32>,
        radius: Option<f32>,
    ) -> Result<Vec<Neighbor>> {
        validate_vector(vector, self.inner.config.dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let epsilon = epsilon.unwrap_or(self.inner.config.default_epsilon);
        let radius = radius.unwrap_or(self.inner.config.default_radius);

        // Overfetch by the pending-delete count so the post-filter can
        // still fill k results.
        let fetch = k.saturating_add(self.inner.vqueue.delete_len() as usize);
        let raw = self.inner.native.search(vector, fetch, epsilon, radius)?;

        let now = self.inner.now();
        let mut results = Vec::with_capacity(k.min(raw.len()));
        for (id, distance) in raw {
            let Some(uuid) = self.inner.kvs.get_uuid(id) else {
                continue;
            };
            if self
                .inner
                .vqueue
                .pending_delete(&uuid)
                .is_some_and(|op| op.timestamp <= now)
            {
                continue;
            }
            results.push(Neighbor { uuid, distance });
            if results.len() == k {
                break;
            }
        }
        Ok(results)
    }

    /// Searches for the `k` nearest records to the vector stored under
    /// `uuid`, returning that vector together with the results.
    ///
    /// The query vector honors pending mutations: a queued insert for
    /// `uuid` is used in place of the committed vector.
    ///
    /// # Errors
    ///
    /// `NotFound` when the UUID is unknown or masked by a queued
    /// delete.
    pub fn search_by_id(
        &self,
        uuid: &str,
        k: usize,
        epsilon: Option<f32>,
        radius: Option<f32>,
    ) -> Result<(Vector, Vec<Neighbor>)> {
        let vector = self.get_object(uuid)?;
        let results = self.search(&vector, k, epsilon, radius)?;
        Ok((vector, results))
    }
}

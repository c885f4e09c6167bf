//! Mutation and point-read operations.
//!
//! Mutations never touch the native index directly: they validate,
//! check presence against the committed map and the queue, and enqueue.
//! A stale operation (older timestamp than what the queue already
//! records for that UUID) is dropped by the queue and the call still
//! succeeds — the caller's newer state wins.
//!
//! Presence rules (what `exists` reports):
//! - queued insert, not superseded        → present
//! - committed, no pending delete         → present
//! - pending delete                       → absent
//! - otherwise                            → absent

use tracing::debug;

use crate::error::{AnnexError, Result};
use crate::types::{validate_uuid, validate_vector, Timestamp, Vector};

use super::Annex;

impl Annex {
    /// Queues an insert for `uuid` at the current time.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on a bad UUID or vector, `AlreadyExists` when
    /// the UUID is committed or already queued for insert,
    /// `FlushingIndex` while the agent is closing.
    pub fn insert(&self, uuid: &str, vector: Vector) -> Result<()> {
        let ts = self.inner.now();
        self.insert_with_time(uuid, vector, ts)
    }

    /// Queues an insert for `uuid` at the caller-supplied timestamp
    /// (Unix nanoseconds).
    pub fn insert_with_time(&self, uuid: &str, vector: Vector, timestamp: Timestamp) -> Result<()> {
        validate_uuid(uuid)?;
        validate_vector(&vector, self.inner.config.dimension)?;
        self.reject_if_closing()?;

        if self.known_for_insert(uuid) {
            return Err(AnnexError::AlreadyExists {
                uuid: uuid.to_string(),
                timestamp,
            });
        }

        if !self.inner.vqueue.push_insert(uuid, vector, timestamp) {
            debug!(uuid, timestamp, "Stale insert dropped by queue");
        }
        Ok(())
    }

    /// Queues an update (logical delete + insert at one timestamp) at
    /// the current time.
    ///
    /// # Errors
    ///
    /// `NotFound` when the UUID is neither committed nor queued for
    /// insert, `SameVector` when the new vector equals the current one.
    pub fn update(&self, uuid: &str, vector: Vector) -> Result<()> {
        let ts = self.inner.now();
        self.update_with_time(uuid, vector, ts)
    }

    /// Queues an update at the caller-supplied timestamp.
    pub fn update_with_time(&self, uuid: &str, vector: Vector, timestamp: Timestamp) -> Result<()> {
        validate_uuid(uuid)?;
        validate_vector(&vector, self.inner.config.dimension)?;
        self.reject_if_closing()?;

        let current = self.current_vector(uuid)?;
        if current == vector {
            return Err(AnnexError::SameVector {
                uuid: uuid.to_string(),
            });
        }

        // Delete-then-insert at one timestamp: the insert supersedes
        // the delete in the queue, and the drain's replace-binding
        // step evicts the old native object.
        self.inner.vqueue.push_delete(uuid, timestamp);
        if !self.inner.vqueue.push_insert(uuid, vector, timestamp) {
            debug!(uuid, timestamp, "Stale update dropped by queue");
        }
        Ok(())
    }

    /// Inserts when the UUID is unknown, updates when it is known.
    /// Never rejects on presence.
    pub fn upsert(&self, uuid: &str, vector: Vector) -> Result<()> {
        let ts = self.inner.now();
        self.upsert_with_time(uuid, vector, ts)
    }

    /// [`upsert`](Annex::upsert) at the caller-supplied timestamp.
    pub fn upsert_with_time(&self, uuid: &str, vector: Vector, timestamp: Timestamp) -> Result<()> {
        validate_uuid(uuid)?;
        if self.known_for_insert(uuid) {
            self.update_with_time(uuid, vector, timestamp)
        } else {
            self.insert_with_time(uuid, vector, timestamp)
        }
    }

    /// Queues a delete for `uuid` at the current time.
    ///
    /// # Errors
    ///
    /// `NotFound` when the UUID is neither committed nor queued for
    /// insert at a timestamp `<=` the delete's.
    pub fn delete(&self, uuid: &str) -> Result<()> {
        let ts = self.inner.now();
        self.delete_with_time(uuid, ts)
    }

    /// Queues a delete at the caller-supplied timestamp.
    ///
    /// A queued insert stamped STRICTLY AFTER the delete does not count
    /// as present: deleting it would reorder the caller's own history.
    pub fn delete_with_time(&self, uuid: &str, timestamp: Timestamp) -> Result<()> {
        validate_uuid(uuid)?;
        self.reject_if_closing()?;

        let committed = self.inner.kvs.contains(uuid);
        let queued = self
            .inner
            .vqueue
            .pending_insert(uuid)
            .is_some_and(|op| op.timestamp <= timestamp);
        if !committed && !queued {
            return Err(AnnexError::not_found(uuid));
        }

        if !self.inner.vqueue.push_delete(uuid, timestamp) {
            debug!(uuid, timestamp, "Stale delete dropped by queue");
        }
        Ok(())
    }

    /// Applies [`insert_with_time`](Annex::insert_with_time) per pair,
    /// stamping each with the current time.
    ///
    /// Failing items do not abort their siblings; their errors are
    /// collected into [`AnnexError::Batch`].
    pub fn insert_multiple(&self, pairs: Vec<(String, Vector)>) -> Result<()> {
        self.multi(pairs, |uuid, vector, ts| {
            self.insert_with_time(uuid, vector, ts)
        })
    }

    /// [`insert_multiple`](Annex::insert_multiple) at one shared
    /// caller-supplied timestamp.
    pub fn insert_multiple_with_time(
        &self,
        pairs: Vec<(String, Vector)>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.multi_at(pairs, timestamp, |uuid, vector, ts| {
            self.insert_with_time(uuid, vector, ts)
        })
    }

    /// Applies [`update_with_time`](Annex::update_with_time) per pair.
    pub fn update_multiple(&self, pairs: Vec<(String, Vector)>) -> Result<()> {
        self.multi(pairs, |uuid, vector, ts| {
            self.update_with_time(uuid, vector, ts)
        })
    }

    /// [`update_multiple`](Annex::update_multiple) at one shared
    /// caller-supplied timestamp.
    pub fn update_multiple_with_time(
        &self,
        pairs: Vec<(String, Vector)>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.multi_at(pairs, timestamp, |uuid, vector, ts| {
            self.update_with_time(uuid, vector, ts)
        })
    }

    /// Applies [`upsert_with_time`](Annex::upsert_with_time) per pair.
    pub fn upsert_multiple(&self, pairs: Vec<(String, Vector)>) -> Result<()> {
        self.multi(pairs, |uuid, vector, ts| {
            self.upsert_with_time(uuid, vector, ts)
        })
    }

    /// [`upsert_multiple`](Annex::upsert_multiple) at one shared
    /// caller-supplied timestamp.
    pub fn upsert_multiple_with_time(
        &self,
        pairs: Vec<(String, Vector)>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.multi_at(pairs, timestamp, |uuid, vector, ts| {
            self.upsert_with_time(uuid, vector, ts)
        })
    }

    /// Applies [`delete_with_time`](Annex::delete_with_time) per UUID.
    pub fn delete_multiple(&self, uuids: Vec<String>) -> Result<()> {
        let mut errors = Vec::new();
        for uuid in uuids {
            let ts = self.inner.now();
            if let Err(e) = self.delete_with_time(&uuid, ts) {
                errors.push((uuid, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AnnexError::Batch(errors))
        }
    }

    /// [`delete_multiple`](Annex::delete_multiple) at one shared
    /// caller-supplied timestamp.
    pub fn delete_multiple_with_time(
        &self,
        uuids: Vec<String>,
        timestamp: Timestamp,
    ) -> Result<()> {
        let mut errors = Vec::new();
        for uuid in uuids {
            if let Err(e) = self.delete_with_time(&uuid, timestamp) {
                errors.push((uuid, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AnnexError::Batch(errors))
        }
    }

    /// Returns true if `uuid` is visible: committed without a pending
    /// delete, or queued for insert.
    pub fn exists(&self, uuid: &str) -> bool {
        if self.inner.vqueue.pending_insert(uuid).is_some() {
            return true;
        }
        if self.inner.vqueue.pending_delete(uuid).is_some() {
            return false;
        }
        self.inner.kvs.contains(uuid)
    }

    /// Returns the vector for `uuid`: the queued insert when present,
    /// otherwise the committed vector.
    ///
    /// # Errors
    ///
    /// `NotFound` when the UUID is unknown or masked by a queued
    /// delete.
    pub fn get_object(&self, uuid: &str) -> Result<Vector> {
        validate_uuid(uuid)?;
        self.current_vector(uuid)
    }

    /// The vector currently visible for `uuid` (queue first, then the
    /// committed index).
    fn current_vector(&self, uuid: &str) -> Result<Vector> {
        if let Some(op) = self.inner.vqueue.pending_insert(uuid) {
            return Ok(op.vector);
        }
        if self.inner.vqueue.pending_delete(uuid).is_some() {
            return Err(AnnexError::not_found(uuid));
        }
        match self.inner.kvs.get_id(uuid) {
            // A committed UUID whose native object is missing (partial
            // recovery) resolves as NotFound, keyed by the UUID.
            Some(id) => self
                .inner
                .native
                .get_vector(id)
                .map_err(|_| AnnexError::not_found(uuid)),
            None => Err(AnnexError::not_found(uuid)),
        }
    }

    /// Presence check for the insert/upsert path: a pending insert or
    /// an unmasked committed record counts as known.
    fn known_for_insert(&self, uuid: &str) -> bool {
        if self.inner.vqueue.pending_insert(uuid).is_some() {
            return true;
        }
        self.inner.kvs.contains(uuid) && self.inner.vqueue.pending_delete(uuid).is_none()
    }

    fn reject_if_closing(&self) -> Result<()> {
        if self.inner.is_closing() {
            return Err(AnnexError::FlushingIndex);
        }
        Ok(())
    }

    fn multi<F>(&self, pairs: Vec<(String, Vector)>, apply: F) -> Result<()>
    where
        F: Fn(&str, Vector, Timestamp) -> Result<()>,
    {
        let mut errors = Vec::new();
        for (uuid, vector) in pairs {
            let ts = self.inner.now();
            if let Err(e) = apply(&uuid, vector, ts) {
                errors.push((uuid, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AnnexError::Batch(errors))
        }
    }

    fn multi_at<F>(&self, pairs: Vec<(String, Vector)>, timestamp: Timestamp, apply: F) -> Result<()>
    where
        F: Fn(&str, Vector, Timestamp) -> Result<()>,
    {
        let mut errors = Vec::new();
        for (uuid, vector) in pairs {
            if let Err(e) = apply(&uuid, vector, timestamp) {
                errors.push((uuid, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AnnexError::Batch(errors))
        }
    }
}

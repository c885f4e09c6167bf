//! Durable vector storage for the native index.
//!
//! Committed vectors are the source of truth; the HNSW graph is derived
//! from them and rebuilt when needed. The store is a single redb
//! database with two tables:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ VECTORS_TABLE                                               │
//! │   Key: u32 (internal id)                                    │
//! │   Value: &[u8] (object-type-encoded vector components)      │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ META_TABLE                                                  │
//! │   Key: &str                                                 │
//! │   Value: &[u8] (bincode)                                    │
//! │   Entries: "store_metadata" -> StoreMetadata                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Durability model
//!
//! Writes commit with `Durability::None`: visible to every reader in
//! this process immediately, but not persisted. `persist()` issues one
//! durable commit, which also makes every earlier non-durable commit
//! durable — that single call is the agent's save point, so a crash
//! recovers exactly the state of the last save.
//!
//! In memory mode the database uses redb's in-memory backend and no
//! file ever exists.

use std::path::Path;

use redb::backends::InMemoryBackend;
use redb::{Database, Durability, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, DistanceMetric, ObjectType};
use crate::error::{AnnexError, Result, ValidationError};
use crate::types::InternalId;

/// Store file name inside the index directory.
pub const STORE_FILE: &str = "vectors.redb";

/// Current store schema version.
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Metadata key in the meta table.
const METADATA_KEY: &str = "store_metadata";

const VECTORS_TABLE: TableDefinition<u32, &[u8]> = TableDefinition::new("vectors");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Store metadata, bincode-serialized under `"store_metadata"`.
///
/// `next_id` and `free_ids` are snapshotted at each save; on open they
/// are reconciled against the vectors table so a stale snapshot can
/// never hand out an id that is still live.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct StoreMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,
    /// Vector dimension. Fixed at creation.
    pub dimension: usize,
    /// Distance metric. Fixed at creation.
    pub distance: DistanceMetric,
    /// At-rest encoding. Fixed at creation.
    pub object_type: ObjectType,
    /// Next never-assigned internal id.
    pub next_id: InternalId,
    /// Ids reclaimed by past rebuilds, available for reuse.
    pub free_ids: Vec<InternalId>,
}

/// redb-backed vector store.
///
/// `Send + Sync`; redb provides MVCC readers and an exclusive writer
/// internally. The caller (the native index) already serializes writes
/// behind its writer mutex.
#[derive(Debug)]
pub(crate) struct VectorStore {
    db: Database,
    dimension: usize,
    object_type: ObjectType,
}

impl VectorStore {
    /// Opens or creates the store.
    ///
    /// `dir` of `None` selects the in-memory backend. For an existing
    /// store the configured dimension, metric, and object type must
    /// match what the store was created with.
    pub(crate) fn open(dir: Option<&Path>, config: &Config) -> Result<(Self, StoreMetadata)> {
        let db = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Database::create(dir.join(STORE_FILE))?
            }
            None => Database::builder().create_with_backend(InMemoryBackend::new())?,
        };

        let store = Self {
            db,
            dimension: config.dimension,
            object_type: config.object_type,
        };

        let metadata = store.init_metadata(config)?;
        Ok((store, metadata))
    }

    /// Creates the tables and reads or initializes the metadata entry.
    fn init_metadata(&self, config: &Config) -> Result<StoreMetadata> {
        let txn = self.db.begin_write()?;
        let metadata = {
            let mut meta = txn.open_table(META_TABLE)?;
            // Ensure the vectors table exists so read transactions
            // never observe a missing table.
            txn.open_table(VECTORS_TABLE)?;

            let existing = meta.get(METADATA_KEY)?.map(|guard| guard.value().to_vec());
            match existing {
                Some(bytes) => {
                    let metadata: StoreMetadata = bincode::deserialize(&bytes)?;
                    Self::validate_metadata(&metadata, config)?;
                    metadata
                }
                None => {
                    let fresh = StoreMetadata {
                        schema_version: STORE_SCHEMA_VERSION,
                        dimension: config.dimension,
                        distance: config.distance,
                        object_type: config.object_type,
                        next_id: 0,
                        free_ids: Vec::new(),
                    };
                    let bytes = bincode::serialize(&fresh)?;
                    meta.insert(METADATA_KEY, bytes.as_slice())?;
                    debug!(
                        dimension = config.dimension,
                        "Initialized fresh vector store"
                    );
                    fresh
                }
            }
        };
        txn.commit()?;

        Ok(metadata)
    }

    fn validate_metadata(metadata: &StoreMetadata, config: &Config) -> Result<()> {
        if metadata.schema_version != STORE_SCHEMA_VERSION {
            return Err(AnnexError::storage(format!(
                "store schema version mismatch: expected {}, found {}",
                STORE_SCHEMA_VERSION, metadata.schema_version
            )));
        }
        if metadata.dimension != config.dimension {
            return Err(ValidationError::invalid_field(
                "dimension",
                format!(
                    "store was created with dimension {}, config says {}",
                    metadata.dimension, config.dimension
                ),
            )
            .into());
        }
        if metadata.distance != config.distance {
            return Err(ValidationError::invalid_field(
                "distance",
                format!(
                    "store was created with {:?}, config says {:?}",
                    metadata.distance, config.distance
                ),
            )
            .into());
        }
        if metadata.object_type != config.object_type {
            return Err(ValidationError::invalid_field(
                "object_type",
                format!(
                    "store was created with {:?}, config says {:?}",
                    metadata.object_type, config.object_type
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Writes a vector under `id` (non-durable commit).
    pub(crate) fn put(&self, id: InternalId, vector: &[f32]) -> Result<()> {
        let encoded = self.encode(vector);
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::None);
        {
            let mut table = txn.open_table(VECTORS_TABLE)?;
            table.insert(id, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Removes the vector under `id`; returns false if absent.
    pub(crate) fn remove(&self, id: InternalId) -> Result<bool> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::None);
        let removed = {
            let mut table = txn.open_table(VECTORS_TABLE)?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Reads and decodes the vector under `id`.
    pub(crate) fn get(&self, id: InternalId) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS_TABLE)?;
        Ok(table.get(id)?.map(|guard| self.decode(guard.value())))
    }

    /// Loads every stored `(id, vector)` pair.
    pub(crate) fn load_all(&self) -> Result<Vec<(InternalId, Vec<f32>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            out.push((key.value(), self.decode(value.value())));
        }
        Ok(out)
    }

    /// Number of stored vectors.
    pub(crate) fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS_TABLE)?;
        Ok(table.len()?)
    }

    /// Largest stored id, if any.
    pub(crate) fn last_id(&self) -> Result<Option<InternalId>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS_TABLE)?;
        let last = table.last()?.map(|(key, _)| key.value());
        Ok(last)
    }

    /// Returns true if `id` is stored.
    pub(crate) fn contains(&self, id: InternalId) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS_TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    /// Writes the metadata snapshot and issues a durable commit.
    ///
    /// This is the save point: every non-durable commit since the last
    /// call becomes durable here.
    pub(crate) fn persist(&self, metadata: &StoreMetadata) -> Result<()> {
        let bytes = bincode::serialize(metadata)?;
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Immediate);
        {
            let mut table = txn.open_table(META_TABLE)?;
            table.insert(METADATA_KEY, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn encode(&self, vector: &[f32]) -> Vec<u8> {
        match self.object_type {
            ObjectType::Float32 => {
                let mut bytes = Vec::with_capacity(vector.len() * 4);
                for component in vector {
                    bytes.extend_from_slice(&component.to_le_bytes());
                }
                bytes
            }
            ObjectType::Float16 => {
                let mut bytes = Vec::with_capacity(vector.len() * 2);
                for component in vector {
                    bytes.extend_from_slice(&half::f16::from_f32(*component).to_le_bytes());
                }
                bytes
            }
            ObjectType::Uint8 => vector
                .iter()
                .map(|component| component.clamp(0.0, 255.0).round() as u8)
                .collect(),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Vec<f32> {
        match self.object_type {
            ObjectType::Float32 => bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
            ObjectType::Float16 => bytes
                .chunks_exact(2)
                .map(|chunk| half::f16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
                .collect(),
            ObjectType::Uint8 => bytes.iter().map(|byte| f32::from(*byte)).collect(),
        }
    }

    /// The dimension this store was opened with.
    pub(crate) fn dimension(&self) -> usize {
        self.dimension
    }
}

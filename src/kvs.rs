//! Bidirectional UUID ⇄ internal-id map.
//!
//! The map is the authoritative record of what is currently committed
//! into the native index: an entry is created when a queued insert is
//! drained and destroyed when a queued delete is drained. Both sides
//! are unique.
//!
//! # Thread Safety
//!
//! Both directions are [`DashMap`]s, so readers never block each other
//! and writers contend only per shard. The length counter is atomic and
//! read without touching the shards.
//!
//! # Snapshot Format (`kvs.snap`)
//!
//! ```text
//! [Magic: "VKVS" 4 bytes]
//! [Version: u32 LE = 1]
//! [Count: u64 LE]
//! count × [uuid_len: u32 LE][uuid bytes][internal_id: u32 LE][reserved: u32 LE = 0]
//! [CRC32 of all preceding bytes: u32 LE]
//! ```
//!
//! Snapshots are written to a temp file, fsynced, and renamed into
//! place; the rename is the commit point. A leftover `.tmp` from a
//! crashed save is ignored on load.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::config::MAX_UUID_LEN;
use crate::error::{AnnexError, Result, SnapshotError};
use crate::types::InternalId;

/// Snapshot file magic bytes.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"VKVS";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot file name inside the index directory.
pub const SNAPSHOT_FILE: &str = "kvs.snap";

/// Bidirectional unique map between UUIDs and internal ids.
///
/// Implementations must be `Send + Sync`; all methods take `&self` and
/// use interior mutability so the map can sit behind an `Arc` shared
/// with the background controller.
pub trait BidiMap: Send + Sync {
    /// Atomically binds `uuid ⇄ id` in both directions.
    ///
    /// Returns the id previously bound to this UUID, if any — the
    /// caller must then remove that object from the native index to
    /// keep both sides unique.
    fn insert(&self, uuid: &str, id: InternalId) -> Option<InternalId>;

    /// Removes the binding for `uuid`, returning its id if present.
    fn remove_by_uuid(&self, uuid: &str) -> Option<InternalId>;

    /// Removes the binding for `id`, returning its UUID if present.
    fn remove_by_id(&self, id: InternalId) -> Option<String>;

    /// Looks up the internal id for a UUID.
    fn get_id(&self, uuid: &str) -> Option<InternalId>;

    /// Looks up the UUID for an internal id.
    fn get_uuid(&self, id: InternalId) -> Option<String>;

    /// Returns true if the UUID is bound.
    fn contains(&self, uuid: &str) -> bool;

    /// Number of bindings.
    fn len(&self) -> u64;

    /// Returns true if the map holds no bindings.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All bound UUIDs, snapshotted at call time.
    ///
    /// Readers tolerate concurrent writers; a UUID inserted or removed
    /// mid-iteration may or may not appear.
    fn uuids(&self) -> Vec<String>;

    /// Serializes the map in the `kvs.snap` format.
    fn save(&self, writer: &mut dyn Write) -> Result<()>;
}

/// Default [`BidiMap`] implementation sharded with [`DashMap`].
#[derive(Debug, Default)]
pub struct ShardedBidiMap {
    uuid_to_id: DashMap<String, InternalId>,
    id_to_uuid: DashMap<InternalId, String>,
    len: AtomicU64,
}

impl ShardedBidiMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a map from a reader in the `kvs.snap` format.
    ///
    /// # Errors
    ///
    /// Returns [`AnnexError::Corrupt`] when the magic, version, frame
    /// lengths, checksum, or uniqueness invariants fail.
    pub fn load(reader: &mut dyn Read) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Loads a map from `dir/kvs.snap`.
    ///
    /// A missing snapshot yields an empty map (a fresh index directory
    /// that has never been saved).
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No kvs snapshot; starting empty");
            return Ok(Self::new());
        }
        let mut file = File::open(&path)?;
        Self::load(&mut file)
    }

    /// Writes the snapshot to `dir/kvs.snap` atomically.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        save_snapshot(self, dir)
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        // magic + version + count + crc
        const MIN_SIZE: usize = 4 + 4 + 8 + 4;
        if data.len() < MIN_SIZE {
            return Err(SnapshotError::Truncated("snapshot too small".to_string()).into());
        }

        if &data[0..4] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic.into());
        }

        let version = u32::from_le_bytes(
            data[4..8]
                .try_into()
                .map_err(|_| SnapshotError::Truncated("invalid version bytes".to_string()))?,
        );
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version).into());
        }

        let stored_crc = u32::from_le_bytes(
            data[data.len() - 4..]
                .try_into()
                .map_err(|_| SnapshotError::Truncated("invalid CRC bytes".to_string()))?,
        );
        let computed_crc = crc32fast::hash(&data[..data.len() - 4]);
        if stored_crc != computed_crc {
            return Err(SnapshotError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            }
            .into());
        }

        let count = u64::from_le_bytes(
            data[8..16]
                .try_into()
                .map_err(|_| SnapshotError::Truncated("invalid count bytes".to_string()))?,
        );

        let map = Self::new();
        let payload = &data[..data.len() - 4];
        let mut offset = 16;

        for _ in 0..count {
            let uuid_len = read_u32(payload, &mut offset)? as usize;
            if uuid_len == 0 || uuid_len > MAX_UUID_LEN {
                return Err(SnapshotError::Truncated(format!(
                    "entry uuid length {} out of range",
                    uuid_len
                ))
                .into());
            }
            if offset + uuid_len > payload.len() {
                return Err(SnapshotError::Truncated("entry uuid truncated".to_string()).into());
            }
            let uuid = String::from_utf8(payload[offset..offset + uuid_len].to_vec())
                .map_err(|_| SnapshotError::Truncated("entry uuid not UTF-8".to_string()))?;
            offset += uuid_len;

            let id = read_u32(payload, &mut offset)?;
            let _reserved = read_u32(payload, &mut offset)?;

            if map.uuid_to_id.contains_key(&uuid) {
                return Err(SnapshotError::DuplicateUuid(uuid).into());
            }
            if map.id_to_uuid.contains_key(&id) {
                return Err(SnapshotError::DuplicateId(id).into());
            }
            map.uuid_to_id.insert(uuid.clone(), id);
            map.id_to_uuid.insert(id, uuid);
        }

        if offset != payload.len() {
            return Err(
                SnapshotError::Truncated("trailing bytes after last entry".to_string()).into(),
            );
        }

        map.len.store(count, Ordering::SeqCst);
        Ok(map)
    }
}

/// Writes a map snapshot to `dir/kvs.snap` atomically.
///
/// The temp file is fsynced before the rename so the commit point is
/// the rename itself.
pub(crate) fn save_snapshot(map: &dyn BidiMap, dir: &Path) -> Result<()> {
    let path = dir.join(SNAPSHOT_FILE);
    let tmp_path = path.with_extension("snap.tmp");

    let mut file = File::create(&tmp_path)?;
    map.save(&mut file)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    if *offset + 4 > data.len() {
        return Err(AnnexError::Corrupt(SnapshotError::Truncated(
            "not enough bytes for u32".to_string(),
        )));
    }
    let value = u32::from_le_bytes(
        data[*offset..*offset + 4]
            .try_into()
            .map_err(|_| SnapshotError::Truncated("invalid u32 bytes".to_string()))?,
    );
    *offset += 4;
    Ok(value)
}

impl BidiMap for ShardedBidiMap {
    fn insert(&self, uuid: &str, id: InternalId) -> Option<InternalId> {
        match self.uuid_to_id.entry(uuid.to_string()) {
            Entry::Occupied(mut entry) => {
                let prev = *entry.get();
                entry.insert(id);
                self.id_to_uuid.remove(&prev);
                self.id_to_uuid.insert(id, uuid.to_string());
                Some(prev)
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
                self.id_to_uuid.insert(id, uuid.to_string());
                self.len.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    fn remove_by_uuid(&self, uuid: &str) -> Option<InternalId> {
        let (_, id) = self.uuid_to_id.remove(uuid)?;
        self.id_to_uuid.remove(&id);
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(id)
    }

    fn remove_by_id(&self, id: InternalId) -> Option<String> {
        let (_, uuid) = self.id_to_uuid.remove(&id)?;
        self.uuid_to_id.remove(&uuid);
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(uuid)
    }

    fn get_id(&self, uuid: &str) -> Option<InternalId> {
        self.uuid_to_id.get(uuid).map(|r| *r)
    }

    fn get_uuid(&self, id: InternalId) -> Option<String> {
        self.id_to_uuid.get(&id).map(|r| r.clone())
    }

    fn contains(&self, uuid: &str) -> bool {
        self.uuid_to_id.contains_key(uuid)
    }

    fn len(&self) -> u64 {
        self.len.load(Ordering::SeqCst)
    }

    fn uuids(&self) -> Vec<String> {
        self.uuid_to_id.iter().map(|r| r.key().clone()).collect()
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        // Build the frame in memory so the CRC covers exactly what is
        // written. Entries are ~uuid_len + 12 bytes each.
        let entries: Vec<(String, InternalId)> = self
            .uuid_to_id
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect();

        let mut buf = Vec::with_capacity(16 + entries.len() * 48);
        buf.extend_from_slice(SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());

        for (uuid, id) in &entries {
            buf.extend_from_slice(&(uuid.len() as u32).to_le_bytes());
            buf.extend_from_slice(uuid.as_bytes());
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        writer.write_all(&buf)?;
        Ok(())
    }
}

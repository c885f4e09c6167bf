//! Configuration types for Annex.
//!
//! The [`Config`] struct controls agent behavior including:
//! - Index location (on disk or fully in memory)
//! - Vector dimension, distance metric, and storage object type
//! - Background drain / save / GC cadence
//!
//! # Example
//! ```rust
//! use annex::{Config, DistanceMetric};
//!
//! // Customize for production
//! let config = Config {
//!     dimension: 768,
//!     distance: DistanceMetric::Cosine,
//!     auto_index_length: 10_000,
//!     ..Config::in_memory(768)
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum supported vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum UUID length in bytes (fixed by the snapshot entry format).
pub const MAX_UUID_LEN: usize = 2048;

/// Agent configuration options.
///
/// Use the [`Config::on_disk`] / [`Config::in_memory`] constructors and
/// struct update syntax to override specific settings:
///
/// ```rust
/// use annex::Config;
///
/// let config = Config {
///     auto_index_length: 500,
///     ..Config::in_memory(128)
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Index directory. Required unless `in_memory_mode` is set.
    pub path: Option<PathBuf>,

    /// When true, no files are read or written anywhere.
    pub in_memory_mode: bool,

    /// Vector dimension (1..=4096). Fixed for the life of the index.
    pub dimension: usize,

    /// Distance metric used by the graph and by searches.
    pub distance: DistanceMetric,

    /// Storage encoding for committed vectors.
    pub object_type: ObjectType,

    /// Queued-op count at which the controller drains immediately.
    pub auto_index_length: usize,

    /// Maximum age of a non-empty queue before the controller drains it.
    pub auto_index_duration: Duration,

    /// Minimum interval between controller-initiated saves.
    pub auto_save_index_duration: Duration,

    /// Controller tick period.
    pub auto_index_check_duration: Duration,

    /// Drains are suppressed for this long after `start()`.
    pub init_index_delay: Duration,

    /// Lower bound on the open-from-disk timeout.
    pub min_load_index_timeout: Duration,

    /// Upper bound on the open-from-disk timeout.
    pub max_load_index_timeout: Duration,

    /// Per-committed-entry contribution to the open timeout.
    ///
    /// Timeout = clamp(factor × entries, min, max).
    pub load_index_timeout_factor: Duration,

    /// Thread count for graph builds; also used when a caller passes
    /// pool size 0 to `create_index`.
    pub default_pool_size: u32,

    /// Search radius when the caller omits one. Negative = unbounded.
    pub default_radius: f32,

    /// Search exploration slack when the caller omits one.
    pub default_epsilon: f32,

    /// Run the heap-release hook after drains.
    pub enable_proactive_gc: bool,

    /// GC runs each time the drain counter advances by this many.
    pub proactive_gc_stride: u64,

    /// HNSW graph tuning parameters.
    pub hnsw: GraphConfig,
}

impl Config {
    /// Creates a configuration for an on-disk index at `path`.
    pub fn on_disk(path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            path: Some(path.into()),
            in_memory_mode: false,
            ..Self::base(dimension)
        }
    }

    /// Creates a configuration for a fully in-memory index.
    ///
    /// No files are read or written; `save_index` becomes a no-op.
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            path: None,
            in_memory_mode: true,
            ..Self::base(dimension)
        }
    }

    fn base(dimension: usize) -> Self {
        Self {
            path: None,
            in_memory_mode: false,
            dimension,
            distance: DistanceMetric::default(),
            object_type: ObjectType::default(),
            auto_index_length: 100,
            auto_index_duration: Duration::from_secs(60),
            auto_save_index_duration: Duration::from_secs(180),
            auto_index_check_duration: Duration::from_secs(1),
            init_index_delay: Duration::ZERO,
            min_load_index_timeout: Duration::from_secs(3),
            max_load_index_timeout: Duration::from_secs(600),
            load_index_timeout_factor: Duration::from_micros(500),
            default_pool_size: 4,
            default_radius: -1.0,
            default_epsilon: 0.1,
            enable_proactive_gc: false,
            proactive_gc_stride: 1,
            hnsw: GraphConfig::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `Annex::open()`. You can also call this
    /// explicitly to check configuration before attempting to open.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `dimension` is 0 or exceeds [`MAX_DIMENSION`]
    /// - `path` is missing for an on-disk index
    /// - `default_pool_size`, `auto_index_length`, or
    ///   `proactive_gc_stride` is 0
    /// - the load-timeout bounds are inverted
    /// - any HNSW parameter is 0
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dimension == 0 {
            return Err(ValidationError::invalid_field(
                "dimension",
                "must be greater than 0",
            ));
        }
        if self.dimension > MAX_DIMENSION {
            return Err(ValidationError::invalid_field(
                "dimension",
                format!("must not exceed {}", MAX_DIMENSION),
            ));
        }

        if !self.in_memory_mode && self.path.is_none() {
            return Err(ValidationError::invalid_field(
                "path",
                "required unless in_memory_mode is set",
            ));
        }

        if self.auto_index_length == 0 {
            return Err(ValidationError::invalid_field(
                "auto_index_length",
                "must be greater than 0",
            ));
        }
        if self.default_pool_size == 0 {
            return Err(ValidationError::invalid_field(
                "default_pool_size",
                "must be greater than 0",
            ));
        }
        if self.proactive_gc_stride == 0 {
            return Err(ValidationError::invalid_field(
                "proactive_gc_stride",
                "must be greater than 0",
            ));
        }
        if self.min_load_index_timeout > self.max_load_index_timeout {
            return Err(ValidationError::invalid_field(
                "min_load_index_timeout",
                "must not exceed max_load_index_timeout",
            ));
        }

        if self.hnsw.max_nb_connection == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.max_nb_connection",
                "must be greater than 0",
            ));
        }
        if self.hnsw.ef_construction == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_construction",
                "must be greater than 0",
            ));
        }
        if self.hnsw.ef_search == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_search",
                "must be greater than 0",
            ));
        }
        if self.hnsw.max_layer == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.max_layer",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Distance metrics recognized at configuration time.
///
/// The metric is fixed when the index is created and persisted in the
/// store metadata; reopening with a different metric is an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Manhattan distance.
    L1,
    /// Euclidean distance.
    #[default]
    L2,
    /// Angular distance (arccos of cosine similarity).
    Angle,
    /// Component-wise inequality count.
    Hamming,
    /// Generalized Jaccard distance.
    Jaccard,
    /// Cosine distance (1 − cosine similarity).
    Cosine,
    /// Euclidean distance after normalizing both vectors.
    NormalizedL2,
    /// Hyperbolic distance in the Poincaré ball model.
    Poincare,
    /// Hyperbolic distance in the Lorentz (hyperboloid) model.
    Lorentz,
}

/// Storage encoding for committed vectors.
///
/// Distance math is always performed in f32; the object type only
/// controls how vectors are encoded at rest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    /// Components clamped and rounded into 0..=255.
    Uint8,
    /// IEEE 754 half precision.
    Float16,
    /// Full single precision.
    #[default]
    Float32,
}

impl ObjectType {
    /// Bytes per component at rest.
    #[inline]
    pub const fn component_size(&self) -> usize {
        match self {
            Self::Uint8 => 1,
            Self::Float16 => 2,
            Self::Float32 => 4,
        }
    }
}

/// Configuration for the HNSW graph.
///
/// Controls the trade-off between build time, memory usage, and search
/// accuracy. The defaults are tuned for the agent's target scale
/// (10K-1M committed vectors).
///
/// # Tuning Guide
///
/// | Use Case     | M  | ef_construction | ef_search |
/// |--------------|----|-----------------|-----------|
/// | Low memory   |  8 |             100 |        30 |
/// | Balanced     | 16 |             200 |        50 |
/// | High recall  | 32 |             400 |       100 |
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Maximum bidirectional connections per node (M parameter).
    ///
    /// Higher values improve recall but increase memory and build time.
    /// Default: 16
    pub max_nb_connection: usize,

    /// Number of candidates tracked during graph construction.
    ///
    /// Rule of thumb: ef_construction >= 2 * max_nb_connection.
    /// Default: 200
    pub ef_construction: usize,

    /// Number of candidates tracked during search.
    ///
    /// Must be >= k; searches widen it further by the epsilon slack.
    /// Default: 50
    pub ef_search: usize,

    /// Maximum number of layers in the skip-list structure.
    ///
    /// Default 16 handles datasets up to ~1M vectors with M=16.
    pub max_layer: usize,

    /// Initial pre-allocated capacity (number of vectors).
    ///
    /// The graph grows beyond this automatically.
    /// Default: 10_000
    pub max_elements: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 50,
            max_layer: 16,
            max_elements: 10_000,
        }
    }
}

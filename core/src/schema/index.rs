//! Index descriptors: name, kind, key paths, stored fields and kind-specific
//! options. The kind set is closed; a new kind means a new variant here and a
//! maintainer registered at process startup.

use crate::error::{Error, Result};
use crate::schema::{FieldKind, TypeDescriptor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Lexicographically ordered entries; equality, range, prefix and IN.
    Ordered,
    /// Ordered with an at-most-one-record-per-key-tuple invariant.
    Unique,
    Count,
    Sum,
    Min,
    Max,
    Average,
    /// Probabilistic distinct-count sketch.
    Distinct,
    /// Incremental percentile sketch.
    Percentile,
    /// Skip list with span counters; rank / top-K / percentile / by-rank.
    Ranked,
    /// Ranked, partitioned by time window.
    Leaderboard,
    /// Term postings with document frequencies.
    Text,
    /// Flat or graph-based nearest-neighbor index.
    Vector,
    /// Cell-coverage index over points.
    Spatial,
    /// Directed labeled edges with any-prefix traversal.
    Graph,
    /// Run-length/container integer bitmap.
    Bitmap,
    /// Append-only versionstamped history.
    History,
}

impl IndexKind {
    pub fn is_aggregate(&self) -> bool {
        matches!(self, IndexKind::Count | IndexKind::Sum | IndexKind::Min | IndexKind::Max | IndexKind::Average)
    }

    pub fn label(&self) -> &'static str {
        match self {
            IndexKind::Ordered => "ordered",
            IndexKind::Unique => "unique",
            IndexKind::Count => "count",
            IndexKind::Sum => "sum",
            IndexKind::Min => "min",
            IndexKind::Max => "max",
            IndexKind::Average => "average",
            IndexKind::Distinct => "distinct",
            IndexKind::Percentile => "percentile",
            IndexKind::Ranked => "ranked",
            IndexKind::Leaderboard => "leaderboard",
            IndexKind::Text => "text",
            IndexKind::Vector => "vector",
            IndexKind::Spatial => "spatial",
            IndexKind::Graph => "graph",
            IndexKind::Bitmap => "bitmap",
            IndexKind::History => "history",
        }
    }
}

/// Lifecycle state of one index (see the migration path in the store:
/// disabled, then write-only during build, then readable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Readable,
    WriteOnly,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorMetric {
    L2,
    Cosine,
    Dot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorMode {
    /// Brute-force scan over all stored vectors.
    Flat,
    /// Persistent layered proximity graph.
    Hnsw { m: usize, ef_construction: usize, ef_search: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorOptions {
    pub dimensions: usize,
    pub metric: VectorMetric,
    pub mode: VectorMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeWindow {
    Hourly,
    Daily,
    Weekly,
}

impl TimeWindow {
    /// Bucket id of a timestamp (seconds since epoch).
    pub fn bucket(&self, timestamp: f64) -> i64 {
        let seconds = timestamp as i64;
        match self {
            TimeWindow::Hourly => seconds.div_euclid(3600),
            TimeWindow::Daily => seconds.div_euclid(86_400),
            TimeWindow::Weekly => seconds.div_euclid(7 * 86_400),
        }
    }
}

/// Kind-specific configuration. A flat bag with defaults: only the fields a
/// kind reads are meaningful for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Ordered index over the same value path, consulted to recompute a
    /// deleted extremum for `Min`/`Max`.
    pub backing_index: Option<String>,
    /// Skip-list level-draw fanout: a node reaches level l+1 with
    /// probability 1/fanout. 2 or 4.
    pub ranked_fanout: u32,
    /// Leaderboard partitioning window.
    pub window: Option<TimeWindow>,
    pub vector: Option<VectorOptions>,
    /// Cell levels at which spatial coverage is emitted (z-order bit depth).
    pub spatial_levels: Vec<u8>,
    /// Emit all six (subject, predicate, object) permutations instead of the
    /// forward/reverse pair.
    pub hexastore: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { backing_index: None, ranked_fanout: 2, window: None, vector: None, spatial_levels: vec![12], hexastore: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    /// Index key columns. Kind conventions:
    /// - ordered/unique: the indexed columns in key order
    /// - aggregates, distinct, percentile, bitmap: leading group columns,
    ///   last column is the aggregated value (count: group columns only)
    /// - ranked: the score column; leaderboard: timestamp column then score
    /// - text: the tokenized column; vector: the vector (bytes) column
    /// - spatial: latitude then longitude; graph: from, label, to
    /// - history: none (keyed purely by versionstamp)
    pub key_paths: Vec<String>,
    /// Fields carried in the entry value for covering reads.
    pub stored_fields: Vec<String>,
    #[serde(rename = "options")]
    pub config: IndexConfig,
}

impl IndexDescriptor {
    pub fn new<I, S>(name: impl Into<String>, kind: IndexKind, key_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind,
            key_paths: key_paths.into_iter().map(Into::into).collect(),
            stored_fields: Vec::new(),
            config: IndexConfig::default(),
        }
    }

    pub fn ordered<I, S>(name: impl Into<String>, key_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, IndexKind::Ordered, key_paths)
    }

    pub fn unique<I, S>(name: impl Into<String>, key_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, IndexKind::Unique, key_paths)
    }

    pub fn storing<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stored_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, config: IndexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_unique(&self) -> bool { self.kind == IndexKind::Unique }

    /// The value column of an aggregate-family index (the last key path).
    pub fn value_path(&self) -> Option<&str> { self.key_paths.last().map(|s| s.as_str()) }

    /// Group columns of an aggregate-family index.
    pub fn group_paths(&self) -> &[String] {
        match self.kind {
            IndexKind::Count => &self.key_paths,
            _ => self.key_paths.split_last().map(|(_, rest)| rest).unwrap_or(&[]),
        }
    }

    pub(crate) fn validate(&self, owner: &TypeDescriptor) -> Result<()> {
        for path in self.key_paths.iter().chain(self.stored_fields.iter()) {
            if owner.field_kind(path).is_none() {
                return Err(Error::Schema(format!("index {} references undeclared field {path}", self.name)));
            }
        }
        let kind_of = |path: &str| owner.field_kind(path).unwrap();

        match self.kind {
            IndexKind::Ordered | IndexKind::Unique => {
                if self.key_paths.is_empty() {
                    return Err(Error::Schema(format!("ordered index {} needs at least one key path", self.name)));
                }
            }
            IndexKind::Count => {}
            IndexKind::Sum | IndexKind::Average | IndexKind::Min | IndexKind::Max => {
                let value = self
                    .value_path()
                    .ok_or_else(|| Error::Schema(format!("aggregate index {} needs a value column", self.name)))?;
                // Atomic add/min/max operate on integer encodings; floats are
                // rejected up front rather than silently rounded.
                if kind_of(value) != FieldKind::Int {
                    return Err(Error::UnsupportedType(format!(
                        "aggregate index {} requires an integer value column, {value} is {:?}",
                        self.name,
                        kind_of(value)
                    )));
                }
            }
            IndexKind::Distinct | IndexKind::Percentile => {
                if self.key_paths.is_empty() {
                    return Err(Error::Schema(format!("sketch index {} needs a value column", self.name)));
                }
            }
            IndexKind::Ranked => {
                if self.key_paths.len() != 1 {
                    return Err(Error::Schema(format!("ranked index {} takes exactly one score column", self.name)));
                }
                if !matches!(self.config.ranked_fanout, 2 | 4) {
                    return Err(Error::Schema(format!("ranked index {} fanout must be 2 or 4", self.name)));
                }
            }
            IndexKind::Leaderboard => {
                if self.key_paths.len() != 2 {
                    return Err(Error::Schema(format!("leaderboard index {} takes a timestamp column then a score column", self.name)));
                }
                if self.config.window.is_none() {
                    return Err(Error::Schema(format!("leaderboard index {} needs a time window", self.name)));
                }
            }
            IndexKind::Text => {
                if self.key_paths.len() != 1 || kind_of(&self.key_paths[0]) != FieldKind::String {
                    return Err(Error::Schema(format!("text index {} takes exactly one string column", self.name)));
                }
            }
            IndexKind::Vector => {
                if self.key_paths.len() != 1 || kind_of(&self.key_paths[0]) != FieldKind::Bytes {
                    return Err(Error::Schema(format!("vector index {} takes exactly one bytes column", self.name)));
                }
                let options =
                    self.config.vector.as_ref().ok_or_else(|| Error::Schema(format!("vector index {} needs vector options", self.name)))?;
                if options.dimensions == 0 {
                    return Err(Error::Schema(format!("vector index {} needs a non-zero dimension", self.name)));
                }
            }
            IndexKind::Spatial => {
                if self.key_paths.len() != 2 {
                    return Err(Error::Schema(format!("spatial index {} takes latitude and longitude columns", self.name)));
                }
                if self.config.spatial_levels.is_empty() || self.config.spatial_levels.iter().any(|l| *l == 0 || *l > 30) {
                    return Err(Error::Schema(format!("spatial index {} levels must be within 1..=30", self.name)));
                }
            }
            IndexKind::Graph => {
                if self.key_paths.len() != 3 {
                    return Err(Error::Schema(format!("graph index {} takes from, label and to columns", self.name)));
                }
            }
            IndexKind::Bitmap => {
                let value =
                    self.value_path().ok_or_else(|| Error::Schema(format!("bitmap index {} needs a value column", self.name)))?;
                if kind_of(value) != FieldKind::Int {
                    return Err(Error::UnsupportedType(format!("bitmap index {} requires an integer value column", self.name)));
                }
            }
            IndexKind::History => {
                if !self.key_paths.is_empty() {
                    return Err(Error::Schema(format!("history index {} is keyed by versionstamp and takes no key paths", self.name)));
                }
            }
        }
        Ok(())
    }
}

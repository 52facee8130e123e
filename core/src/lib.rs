//! Lamina: a transactional secondary-index engine and cost-based query
//! planner layered on an ordered key-value store.
//!
//! The store underneath is consumed purely through the `lamina-kv` contract:
//! optimistic multi-key transactions, byte-ordered range scans, atomic
//! mutations and commit versionstamps. This crate supplies everything above
//! it: the order-preserving tuple codec, the directory layer, the record
//! envelope, the retrying transaction runtime, per-kind index maintainers
//! (ordered, aggregate, ranked, text, vector, spatial, graph, bitmap,
//! history), the planner and the executor.

pub mod directory;
pub mod envelope;
pub mod error;
pub mod index;
pub mod query;
pub mod schema;
pub mod store;
pub mod subspace;
pub mod transaction;
pub mod tuple;
pub mod value;

pub use error::{Error, Result};
pub use query::predicate::{ComparisonOp, Predicate, TextOp};
pub use query::Query;
pub use schema::index::{IndexConfig, IndexDescriptor, IndexKind, IndexState};
pub use schema::{DirSegment, FieldDef, FieldExtractor, FieldKind, Persistable, RecordValues, TypeDescriptor};
pub use store::{Partition, RecordStore};
pub use subspace::Subspace;
pub use transaction::{Database, Transaction};
pub use value::Value;

pub use lamina_kv as kv;

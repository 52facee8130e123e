use crate::value::Value;
use lamina_kv::KvError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("KV store error: {0}")]
    Kv(#[from] KvError),

    #[error("uniqueness violation on index {index} field {field}: value {value} already held by {existing_id}")]
    UniquenessViolation { index: String, field: String, value: Value, existing_id: Value },

    #[error("partition values required for fields {fields:?}")]
    PartitionRequired { fields: Vec<String> },

    #[error("missing partition fields {missing:?} for type {type_name}")]
    MissingPartitionFields { type_name: String, missing: Vec<String> },

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("tuple encoding error: {0}")]
    TupleEncoding(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("validation failed in pre-commit check {check}: {message}")]
    ValidationFailed { check: String, message: String },

    #[error("transaction timed out after {0} ms")]
    Timeout(u64),

    #[error("record of {size} bytes exceeds the storable limit of {limit} bytes")]
    OversizeValue { size: usize, limit: usize },

    #[error("cannot delete from {kind} aggregation {index} without a backing value index")]
    UnsupportedAggregationDelete { index: String, kind: &'static str },

    #[error("retry limit of {attempts} exhausted: {last}")]
    RetryLimitExceeded { attempts: usize, last: Box<Error>},

    #[error("transaction cancelled")]
    Cancelled,

    #[error("unknown type {0} (not registered in this container)")]
    UnknownType(String),

    #[error("unknown index {0}")]
    UnknownIndex(String),

    #[error("record not found: {0}")]
    NotFound(Value),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("catalog serialization error: {0}")]
    CatalogJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the transaction runtime may re-run the user closure. Only KV
    /// conflicts and read-version staleness qualify; every engine-level error
    /// is deterministic and would simply recur.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kv(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self { Error::Corrupt(message.into()) }
}

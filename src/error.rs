use thiserror::Error;

/// Errors surfaced by catalog construction and queries.
///
/// Unreadable individual partitions are deliberately *not* represented here:
/// they are skipped with a warning so that a partially available catalog
/// still serves the partitions it has.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or inconsistent configuration: unresolvable quantity reference,
    /// circular rename chain, missing required key, conflicting options.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A requested catalog or config name does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A derivation function failed while computing a homogenized quantity.
    /// Propagated to the caller; never silently replaced by defaults.
    #[error("failed to evaluate quantity '{quantity}': {message}")]
    QuantityEvaluation { quantity: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn evaluation(quantity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::QuantityEvaluation {
            quantity: quantity.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

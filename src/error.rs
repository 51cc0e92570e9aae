use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrismError {
    #[error("Unknown dataflow: {0}")]
    UnknownDataflow(String),

    #[error("Invalid dimension filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid period range: {0}")]
    InvalidPeriod(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl PrismError {
    /// Errors caused by the request itself. These are surfaced immediately and
    /// never worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PrismError::UnknownDataflow(_)
                | PrismError::InvalidFilter(_)
                | PrismError::InvalidPeriod(_)
        )
    }
}

impl From<polars::error::PolarsError> for PrismError {
    fn from(err: polars::error::PolarsError) -> Self {
        PrismError::Polars(err.to_string())
    }
}

impl From<rusqlite::Error> for PrismError {
    fn from(err: rusqlite::Error) -> Self {
        PrismError::Catalog(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrismError>;

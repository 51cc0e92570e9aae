//! SDMX data model and the source contract
//!
//! The wire protocol lives behind [`SdmxSource`]; everything in this crate works
//! against the decoded types below.

pub mod model;

pub use model::*;

use crate::error::Result;
use async_trait::async_trait;

/// Remote statistical data source.
///
/// Implementations own transport, caching and retry policy. A dataflow id the
/// source does not know must surface as [`crate::error::PrismError::UnknownDataflow`].
#[async_trait]
pub trait SdmxSource: Send + Sync {
    /// Structural metadata (dimensions, codelists, content constraint) of a dataflow.
    async fn data_structure(&self, dataflow: &str) -> Result<DataStructure>;

    /// Observations matching the request. An empty result is not an error.
    async fn data(&self, request: &DataRequest) -> Result<DataResponse>;
}

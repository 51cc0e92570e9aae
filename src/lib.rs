//! Labour statistics briefs from SDMX dataflows.
//!
//! Resolves which dimensions an area populates, queries and formats the data,
//! describes the resulting time series and assembles the prompt a language
//! model turns into a plain-language summary.

pub mod catalog;
pub mod config;
pub mod describe;
pub mod dimensions;
pub mod error;
pub mod llm;
pub mod logging;
pub mod narrative;
pub mod pipeline;
pub mod query;
pub mod sdmx;
pub mod table;
pub mod translate;

pub use error::{PrismError, Result};
pub use pipeline::{Brief, Prism, QueryOutcome};

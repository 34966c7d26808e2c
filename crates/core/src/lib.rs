//! Analysis engine for background hang profiles: ingestion, stack table
//! transforms, sample filters, call tree aggregation and per-date graphs.

pub mod categories;
pub mod config;
pub mod date_graph;
pub mod filters;
pub mod model;
pub mod one_to_many;
pub mod parsers;
pub mod selectors;
pub mod summary;
pub mod transforms;

#[cfg(test)]
mod test_utils;

pub use categories::{CategoryTable, SampleCategorizer};
pub use config::{AnalysisConfig, ConfigError};
pub use date_graph::{DateGraph, DateGraphScheduler, build_date_graph};
pub use filters::DateRange;
pub use model::{CallNode, CallTree, Profile, Thread};
pub use parsers::{IngestError, parse_profile};
pub use selectors::{SelectError, ThreadSelector, ThreadView, ViewOptions};

pub mod bhr;

pub use bhr::{IngestError, parse_profile};

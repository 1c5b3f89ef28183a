//! Async edges around the pure engines: load, run, persist, report.

pub mod calculation;
pub mod enrichment;
pub mod matching;

pub use calculation::{CalculationError, CalculationReport, CalculationRunner};
pub use enrichment::{EnrichmentError, EnrichmentResult, PriceEnricher};
pub use matching::{LinkMatcher, MatchingRunError, MatchingRunResult};

//! Variable extraction: transforms, band math, unit conversion and
//! statistics over format-plugin reads.

pub mod expression;
pub mod extractor;
pub mod stats;
pub mod units;

pub use expression::{compile, CompiledExpression};
pub use extractor::VariableExtractor;
pub use stats::{StatsAccumulator, VariableStats};

//! Size and complexity metrics for class files.
pub mod metrics;

pub use metrics::{ClassMetrics, ComplexityLimits, MethodMetrics, SizeTotals};

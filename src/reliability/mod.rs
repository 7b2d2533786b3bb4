pub mod deadline;
pub mod metrics;
pub mod retry;

#[cfg(feature = "metrics")]
pub use metrics::PrometheusSink;
pub use metrics::{
    ConnectionCounters, ConnectionMetrics, MetricsError, MetricsReporter, MetricsSink,
    MetricsSnapshot, TracingSink,
};
pub use deadline::{capped_deadline, deadline_after};
pub use retry::BackoffPolicy;

pub mod backoff;
pub mod event_bus;
pub mod metrics;

pub use backoff::*;
pub use event_bus::*;
pub use metrics::{Histogram, Metrics, MetricsSnapshot, SharedMetrics};

//! Push-based observability for swingscope
//!
//! Counters live in a private Prometheus registry and are rendered as text
//! on demand (the binary logs them at shutdown). No HTTP endpoint is exposed.

pub mod metrics;

pub use metrics::Metrics;

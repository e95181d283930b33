//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Manager, load balancers, zone updaters produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape (optional)
//! ```

pub mod logging;
pub mod metrics;

//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging/metrics → Store client → Manager::run
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → Shutdown::trigger → Manager loop exits
//!     → load balancers dropped → sync workers and zone updaters drain and stop
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;

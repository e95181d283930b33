//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → command line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → ManagerConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; desired load balancer state lives in
//!   the config store, not here
//! - All fields have defaults to allow minimal configs

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ManagerConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProviderConfig;
pub use schema::ProviderMode;
pub use schema::Route53Config;
pub use schema::StoreConfig;
pub use schema::WatchConfig;

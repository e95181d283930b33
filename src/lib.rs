//! Load balancer membership manager library.

pub mod config;
pub mod entry;
pub mod lifecycle;
pub mod load_balancer;
pub mod manager;
pub mod observability;
pub mod provider;
pub mod resilience;
pub mod store;
pub mod zone;

pub use config::ManagerConfig;
pub use lifecycle::Shutdown;
pub use manager::Manager;

//! Resilience helpers.
//!
//! Provider calls are never retried in-cycle: the next sync recomputes the
//! desired state and tries again. Only the config watch reconnects on its
//! own, paced by `backoff.rs`.

pub mod backoff;

pub use backoff::Backoff;

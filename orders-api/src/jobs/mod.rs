//! Background jobs that run next to the HTTP server.

pub mod cache_sweep;

pub use cache_sweep::{cache_sweep_task, CacheSweepMetrics, CacheSweepSnapshot};

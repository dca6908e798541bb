//! Orders Storage - Capability Traits and Adapters
//!
//! Defines the persistence and cache abstractions the order service is
//! written against, plus the adapters that do not need a network peer:
//! an LMDB-backed cache and in-memory versions of both traits.
//! The PostgreSQL store lives in orders-api next to its pool configuration.

pub mod cache;
pub mod memory;
pub mod traits;

pub use cache::{CacheConfig, InMemoryOrderCache, LmdbOrderCache};
pub use memory::{InMemoryOrderStorage, RowCounts};
pub use traits::{CacheStats, OrderCache, OrderStorage};

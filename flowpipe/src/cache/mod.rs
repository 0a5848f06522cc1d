//! Cache collaborator
//!
//! Sinks that persist units write into a [`CacheStore`]. The store is
//! handed to the sink by whoever builds the pipeline; there is no
//! process-wide instance.
//!
//! ```text
//! ┌──────────────┐   set(namespace, key, value, ttl)   ┌──────────────┐
//! │  CacheSink   │ ───────────────────────────────────▶ │  CacheStore  │
//! └──────────────┘                                      └──────────────┘
//!                                                              ▲
//!                                                              │
//!                                                          MemCache
//! ```

pub mod memcache;
pub mod types;

pub use memcache::MemCache;
pub use types::{CacheError, CacheStore};

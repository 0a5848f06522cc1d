//! Built-in sinks
//!
//! - [`LogSink`]: logs every unit
//! - [`CollectSink`]: keeps every unit in memory
//! - [`HttpSink`]: POSTs every unit to an endpoint
//! - [`CacheSink`]: writes every unit into a [`crate::cache::CacheStore`]

pub mod cache;
pub mod collect;
pub mod http;
pub mod logging;

pub use cache::CacheSink;
pub use collect::{CollectSink, Collected};
pub use http::HttpSink;
pub use logging::LogSink;

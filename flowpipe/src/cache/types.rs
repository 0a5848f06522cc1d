//! Cache storage types and traits

use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Errors that can occur in cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The value could not be serialized for storage
    #[error("cannot pack value for {namespace}/{key}")]
    Unpackable { namespace: String, key: String },
}

/// Trait for cache backends
///
/// Values are stored as packed JSON text under `(namespace, key)`.
pub trait CacheStore: Send + Sync {
    /// Read a value.
    ///
    /// - Missing or expired entries read as `None`
    /// - A stored text that does not decode reads as `None`, never as an error
    fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Value>, CacheError>> + Send;

    /// Store a value, replacing any previous one.
    ///
    /// `ttl = None` means the entry never expires.
    fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::cache::CacheStore;
use crate::error::BoxError;
use crate::stage::{Sink, StageConfig, StageFuture};
use crate::unit::{DataUnit, Mode};

/// Writes every unit into a cache under one namespace
///
/// The key is the value of `key_field` when the record has it (string or
/// number), otherwise `id-<index>` with the zero-based arrival index.
/// Byte chunks are decoded first; undecodable chunks are stored as JSON
/// strings.
pub struct CacheSink<C: CacheStore> {
    config: StageConfig,
    cache: Arc<C>,
    namespace: String,
    key_field: Option<String>,
    ttl: Option<Duration>,
    index: u64,
}

impl<C: CacheStore> CacheSink<C> {
    pub fn new(cache: Arc<C>, namespace: impl Into<String>, mode: Mode) -> Self {
        Self {
            config: StageConfig::new("cache", mode),
            cache,
            namespace: namespace.into(),
            key_field: None,
            ttl: None,
            index: 0,
        }
    }

    #[must_use]
    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = Some(key_field.into());
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    fn value_of(&self, unit: &DataUnit) -> Value {
        match unit.decode() {
            Ok(value) => value,
            Err(e) => {
                debug!(stage = %self.config.name, error = %e, "storing chunk as string");
                Value::String(unit.to_text())
            }
        }
    }

    fn key_of(&self, value: &Value) -> String {
        let field = self
            .key_field
            .as_deref()
            .and_then(|field| value.get(field));
        match field {
            Some(Value::String(key)) => key.clone(),
            Some(Value::Number(key)) => key.to_string(),
            _ => format!("id-{}", self.index),
        }
    }
}

impl<C: CacheStore> Sink for CacheSink<C> {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn consume(&mut self, unit: DataUnit) -> StageFuture<'_, Result<(), BoxError>> {
        let value = self.value_of(&unit);
        let key = self.key_of(&value);
        self.index += 1;
        Box::pin(async move {
            self.cache
                .set(&self.namespace, &key, &value, self.ttl)
                .await?;
            trace!(stage = %self.config.name, namespace = %self.namespace, key = %key, "stored");
            Ok(())
        })
    }
}

//! Built-in transforms

use bytes::{Bytes, BytesMut};
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::BoxError;
use crate::stage::{StageConfig, StageFuture, Transform};
use crate::unit::{DataUnit, Mode};

pub const DEFAULT_WRAP_KEY: &str = "transform stream was here";

/// Wraps every unit under a key
///
/// Object mode builds `{key: record}`. Byte mode builds the text
/// `{"key": <chunk>}` from each chunk as given.
pub struct WrapTransform {
    config: StageConfig,
    key: String,
}

impl WrapTransform {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            config: StageConfig::new("wrap", mode),
            key: DEFAULT_WRAP_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    fn wrap(&self, unit: DataUnit) -> DataUnit {
        match unit {
            DataUnit::Record(record) => {
                let mut wrapped = Map::new();
                wrapped.insert(self.key.clone(), record);
                DataUnit::Record(Value::Object(wrapped))
            }
            DataUnit::Bytes(chunk) => {
                let key = Value::String(self.key.clone()).to_string();
                let mut out = BytesMut::with_capacity(key.len() + chunk.len() + 4);
                out.extend_from_slice(b"{");
                out.extend_from_slice(key.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(&chunk);
                out.extend_from_slice(b"}");
                DataUnit::Bytes(out.freeze())
            }
        }
    }
}

impl Transform for WrapTransform {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn transform(&mut self, unit: DataUnit) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        let wrapped = self.wrap(unit);
        trace!(stage = %self.config.name, unit = %wrapped.to_text(), "TRANSFORM");
        Box::pin(async move { Ok(Some(wrapped)) })
    }
}

type TransformFn = Box<dyn FnMut(DataUnit) -> Result<Option<DataUnit>, BoxError> + Send>;
type FlushFn = Box<dyn FnMut() -> Result<Option<DataUnit>, BoxError> + Send>;

/// Closure-backed transform
///
/// ```
/// use flowpipe::{DataUnit, FnTransform, Mode};
///
/// // Drop every record without a "keep" field
/// let filter = FnTransform::new("filter", Mode::Object, |unit: DataUnit| {
///     let keep = unit.as_record().is_some_and(|r| r.get("keep").is_some());
///     Ok(keep.then_some(unit))
/// });
/// # let _ = filter;
/// ```
pub struct FnTransform {
    config: StageConfig,
    transform: TransformFn,
    flush: Option<FlushFn>,
}

impl FnTransform {
    pub fn new<F>(name: impl Into<String>, mode: Mode, transform: F) -> Self
    where
        F: FnMut(DataUnit) -> Result<Option<DataUnit>, BoxError> + Send + 'static,
    {
        Self {
            config: StageConfig::new(name, mode),
            transform: Box::new(transform),
            flush: None,
        }
    }

    /// Closure called once after the last unit
    #[must_use]
    pub fn with_flush<F>(mut self, flush: F) -> Self
    where
        F: FnMut() -> Result<Option<DataUnit>, BoxError> + Send + 'static,
    {
        self.flush = Some(Box::new(flush));
        self
    }

    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }
}

impl Transform for FnTransform {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn transform(&mut self, unit: DataUnit) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        let result = (self.transform)(unit);
        Box::pin(async move { result })
    }

    fn flush(&mut self) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        let result = match self.flush.as_mut() {
            Some(flush) => flush(),
            None => Ok(None),
        };
        Box::pin(async move { result })
    }
}

/// Re-chunks a byte stream on line boundaries
///
/// Each call emits every complete line seen so far as one chunk, or drops
/// the call if no line is complete yet. The trailing partial line is
/// emitted by `flush`.
pub struct LinesTransform {
    config: StageConfig,
    pending: BytesMut,
}

impl LinesTransform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: StageConfig::new("lines", Mode::Bytes),
            pending: BytesMut::new(),
        }
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

    fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.pending.extend_from_slice(chunk);
        let last_newline = self.pending.iter().rposition(|b| *b == b'\n')?;
        Some(self.pending.split_to(last_newline + 1).freeze())
    }
}

impl Default for LinesTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for LinesTransform {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn transform(&mut self, unit: DataUnit) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        let result = match unit {
            DataUnit::Bytes(chunk) => Ok(self.push(&chunk).map(DataUnit::Bytes)),
            DataUnit::Record(_) => Err("lines transform expects byte chunks".into()),
        };
        Box::pin(async move { result })
    }

    fn flush(&mut self) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        let rest = self.pending.split().freeze();
        Box::pin(async move {
            if rest.is_empty() {
                Ok(None)
            } else {
                Ok(Some(DataUnit::Bytes(rest)))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_wrap_record() {
        let mut wrap = WrapTransform::new(Mode::Object);
        let out = wrap.transform(json!({"count": 1}).into()).await.unwrap();
        assert_eq!(
            out,
            Some(DataUnit::Record(
                json!({"transform stream was here": {"count": 1}})
            ))
        );
        assert_eq!(wrap.flush().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrap_chunk() {
        let mut wrap = WrapTransform::new(Mode::Bytes).with_key("k");
        let out = wrap.transform(r#"{"count":2}"#.into()).await.unwrap().unwrap();
        assert_eq!(out, DataUnit::from(r#"{"k": {"count":2}}"#));
        assert_eq!(out.decode().unwrap(), json!({"k": {"count": 2}}));
    }

    #[tokio::test]
    async fn test_fn_transform_flush() {
        let mut t = FnTransform::new("id", Mode::Object, |unit| Ok(Some(unit)))
            .with_flush(|| Ok(Some(json!("done").into())));

        assert_eq!(t.transform(json!(1).into()).await.unwrap(), Some(json!(1).into()));
        assert_eq!(t.flush().await.unwrap(), Some(json!("done").into()));
    }

    #[tokio::test]
    async fn test_fn_transform_without_flush() {
        let mut t = FnTransform::new("id", Mode::Bytes, |unit| Ok(Some(unit)));
        assert_eq!(t.flush().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lines_buffers_across_calls() {
        let mut lines = LinesTransform::new();
        assert_eq!(lines.transform("ab".into()).await.unwrap(), None);
        assert_eq!(
            lines.transform("c\nd\ne".into()).await.unwrap(),
            Some(DataUnit::from("abc\nd\n"))
        );
        assert_eq!(lines.transform("f".into()).await.unwrap(), None);
        assert_eq!(lines.flush().await.unwrap(), Some(DataUnit::from("ef")));
        assert_eq!(lines.flush().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lines_rejects_records() {
        let mut lines = LinesTransform::new();
        assert!(lines.transform(json!({}).into()).await.is_err());
    }
}

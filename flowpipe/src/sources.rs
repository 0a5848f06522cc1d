//! Built-in sources

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::error::BoxError;
use crate::stage::{Source, StageConfig, StageFuture};
use crate::unit::{DataUnit, Mode};

/// Default chunk size of [`FileSource`]
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Bounded counter: emits `{"count": n}` for `n` in `from..=to`
///
/// Byte mode emits the record as compact JSON text.
pub struct CounterSource {
    config: StageConfig,
    /// `None` once the counter passed `to`
    next: Option<u64>,
    to: u64,
}

impl CounterSource {
    /// Counter over `1..=100000`
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self::range(mode, 1, 100_000)
    }

    #[must_use]
    pub fn range(mode: Mode, from: u64, to: u64) -> Self {
        Self {
            config: StageConfig::new("counter", mode),
            next: Some(from),
            to,
        }
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
}

impl Source for CounterSource {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn produce(&mut self) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        Box::pin(async move {
            // One unit per scheduler turn
            tokio::task::yield_now().await;

            let n = match self.next {
                Some(n) if n <= self.to => n,
                _ => {
                    self.next = None;
                    return Ok(None);
                }
            };
            let record = json!({ "count": n });
            self.next = if n < self.to { n.checked_add(1) } else { None };

            let unit = match self.config.mode {
                Mode::Bytes => DataUnit::Bytes(Bytes::from(record.to_string())),
                Mode::Object => DataUnit::Record(record),
            };
            trace!(stage = %self.config.name, unit = %unit.to_text(), "READ");
            Ok(Some(unit))
        })
    }
}

/// Replays a fixed list of units, optionally pausing before each
pub struct SequenceSource {
    config: StageConfig,
    units: VecDeque<DataUnit>,
    delay: Option<Duration>,
}

impl SequenceSource {
    pub fn new(mode: Mode, units: impl IntoIterator<Item = DataUnit>) -> Self {
        Self {
            config: StageConfig::new("sequence", mode),
            units: units.into_iter().collect(),
            delay: None,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
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
}

impl Source for SequenceSource {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn produce(&mut self) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        Box::pin(async move {
            if self.units.is_empty() {
                return Ok(None);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.units.pop_front())
        })
    }
}

/// Reads a file as a sequence of byte chunks
///
/// The file is opened on the first `produce` and kept open until
/// end-of-data or `close`.
pub struct FileSource {
    config: StageConfig,
    path: PathBuf,
    chunk_size: usize,
    file: Option<tokio::fs::File>,
    exhausted: bool,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            config: StageConfig::new("file", Mode::Bytes),
            path: path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            file: None,
            exhausted: false,
        }
    }

    /// Maximum size of each chunk; zero is treated as one byte
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
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

    /// Whether the file handle is currently held
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Source for FileSource {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn produce(&mut self) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        Box::pin(async move {
            if self.exhausted {
                return Ok(None);
            }
            if self.file.is_none() {
                let file = tokio::fs::File::open(&self.path).await?;
                debug!(stage = %self.config.name, path = %self.path.display(), "file opened");
                self.file = Some(file);
            }
            let Some(file) = self.file.as_mut() else {
                return Ok(None);
            };

            let mut buf = vec![0u8; self.chunk_size];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                self.close();
                return Ok(None);
            }
            buf.truncate(n);
            Ok(Some(DataUnit::Bytes(Bytes::from(buf))))
        })
    }

    fn close(&mut self) {
        self.exhausted = true;
        if self.file.take().is_some() {
            debug!(stage = %self.config.name, path = %self.path.display(), "file released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn drain(source: &mut dyn Source) -> Vec<DataUnit> {
        let mut units = Vec::new();
        while let Some(unit) = source.produce().await.unwrap() {
            units.push(unit);
        }
        units
    }

    #[tokio::test]
    async fn test_counter_object_mode() {
        let mut source = CounterSource::range(Mode::Object, 1, 3);
        let units = drain(&mut source).await;
        assert_eq!(
            units,
            vec![
                DataUnit::Record(json!({"count": 1})),
                DataUnit::Record(json!({"count": 2})),
                DataUnit::Record(json!({"count": 3})),
            ]
        );
        // Stays at end-of-data
        assert!(source.produce().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counter_byte_mode() {
        let mut source = CounterSource::range(Mode::Bytes, 7, 7);
        let units = drain(&mut source).await;
        assert_eq!(units, vec![DataUnit::from(r#"{"count":7}"#)]);
    }

    #[tokio::test]
    async fn test_counter_ends_at_u64_max() {
        let mut source = CounterSource::range(Mode::Object, u64::MAX - 1, u64::MAX);
        let units = drain(&mut source).await;
        assert_eq!(
            units,
            vec![
                DataUnit::Record(json!({"count": u64::MAX - 1})),
                DataUnit::Record(json!({"count": u64::MAX})),
            ]
        );
        assert!(source.produce().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counter_empty_range() {
        let mut source = CounterSource::range(Mode::Object, 5, 4);
        assert!(drain(&mut source).await.is_empty());
    }

    #[tokio::test]
    async fn test_sequence_source() {
        let mut source = SequenceSource::new(Mode::Bytes, vec!["a".into(), "b".into()])
            .with_delay(Duration::from_millis(1));
        let units = drain(&mut source).await;
        assert_eq!(units, vec![DataUnit::from("a"), DataUnit::from("b")]);
    }

    #[tokio::test]
    async fn test_file_source_chunks_and_releases() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"Lorem ipsum 0\nLorem ipsum 1\n").unwrap();

        let mut source = FileSource::new(file.path()).with_chunk_size(10);
        let first = source.produce().await.unwrap().unwrap();
        assert!(source.is_open());

        let mut chunks = vec![first];
        chunks.extend(drain(&mut source).await);
        assert!(!source.is_open());

        let mut content = Vec::new();
        for chunk in &chunks {
            let bytes = chunk.as_bytes().unwrap();
            assert!(bytes.len() <= 10);
            content.extend_from_slice(bytes);
        }
        assert_eq!(content, b"Lorem ipsum 0\nLorem ipsum 1\n");
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let mut source = FileSource::new("/definitely/not/here.txt");
        assert!(source.produce().await.is_err());
        assert!(!source.is_open());
    }
}

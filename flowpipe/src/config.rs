//! Declarative pipeline configuration
//!
//! A pipeline can be described in TOML:
//!
//! ```toml
//! mode = "bytes"
//! high_water_mark = 4096
//!
//! [source]
//! kind = "file"
//! path = "input.txt"
//!
//! [[transforms]]
//! kind = "lines"
//!
//! [sink]
//! kind = "http"
//! url = "http://127.0.0.1:8000/"
//! timeout_ms = 5000
//! ```
//!
//! Every stage table accepts optional `name` and `high_water_mark`. The
//! stage value wins over the top-level value, which wins over the mode
//! default.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::cache::MemCache;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::sinks::{CacheSink, HttpSink, LogSink};
use crate::sources::{CounterSource, FileSource, SequenceSource};
use crate::stage::{Stage, StageConfig};
use crate::transforms::{LinesTransform, WrapTransform};
use crate::unit::{DataUnit, Mode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse pipeline config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid pipeline config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Collaborators injected into the stages that need them
#[derive(Clone, Default)]
pub struct Context {
    pub http: reqwest::Client,
    pub cache: Option<Arc<MemCache>>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<MemCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

fn default_from() -> u64 {
    1
}

fn default_to() -> u64 {
    100_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    Counter {
        #[serde(default = "default_from")]
        from: u64,
        #[serde(default = "default_to")]
        to: u64,
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
    Sequence {
        units: Vec<Value>,
        delay_ms: Option<u64>,
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
    File {
        path: PathBuf,
        chunk_size: Option<usize>,
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransformSpec {
    Wrap {
        key: Option<String>,
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
    Lines {
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkSpec {
    Log {
        #[serde(default)]
        parse: bool,
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
    Http {
        url: String,
        timeout_ms: Option<u64>,
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
    Cache {
        namespace: String,
        key_field: Option<String>,
        ttl_secs: Option<u64>,
        name: Option<String>,
        high_water_mark: Option<usize>,
    },
}

/// A pipeline declaration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineSpec {
    pub mode: Mode,
    pub high_water_mark: Option<usize>,
    pub source: SourceSpec,
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
    pub sink: SinkSpec,
}

impl PipelineSpec {
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown stage kinds.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`PipelineSpec::from_toml_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Construct the declared stages and wire them into a pipeline
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when a stage cannot be constructed from its
    /// table, [`ConfigError::Pipeline`] when the stages do not form a valid
    /// pipeline.
    pub fn build(&self, context: &Context) -> Result<Pipeline, ConfigError> {
        let mut stages = Vec::with_capacity(self.transforms.len() + 2);
        stages.push(self.build_source()?);
        for transform in &self.transforms {
            stages.push(self.build_transform(transform));
        }
        stages.push(self.build_sink(context)?);
        Ok(Pipeline::from_stages(self.mode, stages)?)
    }

    fn stage_config(
        &self,
        default_name: &str,
        name: Option<&String>,
        high_water_mark: Option<usize>,
    ) -> StageConfig {
        let high_water_mark = high_water_mark
            .or(self.high_water_mark)
            .unwrap_or_else(|| self.mode.default_high_water_mark());
        StageConfig::new(name.map_or(default_name, String::as_str), self.mode)
            .with_high_water_mark(high_water_mark)
    }

    fn sequence_unit(&self, value: &Value) -> DataUnit {
        match (self.mode, value) {
            (Mode::Object, value) => DataUnit::Record(value.clone()),
            (Mode::Bytes, Value::String(text)) => DataUnit::Bytes(Bytes::from(text.clone())),
            (Mode::Bytes, value) => DataUnit::Bytes(Bytes::from(value.to_string())),
        }
    }

    fn build_source(&self) -> Result<Stage, ConfigError> {
        let stage = match &self.source {
            SourceSpec::Counter {
                from,
                to,
                name,
                high_water_mark,
            } => {
                // `from > to` is an empty range, as with `CounterSource::range`
                let config = self.stage_config("counter", name.as_ref(), *high_water_mark);
                Stage::source(CounterSource::range(self.mode, *from, *to).with_config(config))
            }
            SourceSpec::Sequence {
                units,
                delay_ms,
                name,
                high_water_mark,
            } => {
                let config = self.stage_config("sequence", name.as_ref(), *high_water_mark);
                let units = units.iter().map(|value| self.sequence_unit(value));
                let mut source = SequenceSource::new(self.mode, units).with_config(config);
                if let Some(delay_ms) = delay_ms {
                    source = source.with_delay(Duration::from_millis(*delay_ms));
                }
                Stage::source(source)
            }
            SourceSpec::File {
                path,
                chunk_size,
                name,
                high_water_mark,
            } => {
                let config = self.stage_config("file", name.as_ref(), *high_water_mark);
                let mut source = FileSource::new(path)
                    .with_name(config.name)
                    .with_high_water_mark(config.high_water_mark);
                if let Some(chunk_size) = chunk_size {
                    source = source.with_chunk_size(*chunk_size);
                }
                Stage::source(source)
            }
        };
        Ok(stage)
    }

    fn build_transform(&self, spec: &TransformSpec) -> Stage {
        match spec {
            TransformSpec::Wrap {
                key,
                name,
                high_water_mark,
            } => {
                let config = self.stage_config("wrap", name.as_ref(), *high_water_mark);
                let mut wrap = WrapTransform::new(self.mode).with_config(config);
                if let Some(key) = key {
                    wrap = wrap.with_key(key.clone());
                }
                Stage::transform(wrap)
            }
            TransformSpec::Lines {
                name,
                high_water_mark,
            } => {
                let config = self.stage_config("lines", name.as_ref(), *high_water_mark);
                Stage::transform(
                    LinesTransform::new()
                        .with_name(config.name)
                        .with_high_water_mark(config.high_water_mark),
                )
            }
        }
    }

    fn build_sink(&self, context: &Context) -> Result<Stage, ConfigError> {
        let stage = match &self.sink {
            SinkSpec::Log {
                parse,
                name,
                high_water_mark,
            } => {
                let config = self.stage_config("log", name.as_ref(), *high_water_mark);
                Stage::sink(LogSink::new(self.mode).with_parse(*parse).with_config(config))
            }
            SinkSpec::Http {
                url,
                timeout_ms,
                name,
                high_water_mark,
            } => {
                reqwest::Url::parse(url)
                    .map_err(|e| ConfigError::Invalid(format!("http sink url `{url}`: {e}")))?;
                let config = self.stage_config("http", name.as_ref(), *high_water_mark);
                let mut sink = HttpSink::new(context.http.clone(), url.clone(), self.mode)
                    .with_name(config.name)
                    .with_high_water_mark(config.high_water_mark);
                if let Some(timeout_ms) = timeout_ms {
                    sink = sink.with_timeout(Duration::from_millis(*timeout_ms));
                }
                Stage::sink(sink)
            }
            SinkSpec::Cache {
                namespace,
                key_field,
                ttl_secs,
                name,
                high_water_mark,
            } => {
                let Some(cache) = context.cache.as_ref() else {
                    return Err(ConfigError::Invalid(
                        "cache sink needs a cache in the context".to_string(),
                    ));
                };
                let config = self.stage_config("cache", name.as_ref(), *high_water_mark);
                let mut sink = CacheSink::new(Arc::clone(cache), namespace.clone(), self.mode)
                    .with_name(config.name)
                    .with_high_water_mark(config.high_water_mark);
                if let Some(key_field) = key_field {
                    sink = sink.with_key_field(key_field.clone());
                }
                if let Some(ttl_secs) = ttl_secs {
                    sink = sink.with_ttl(Duration::from_secs(*ttl_secs));
                }
                Stage::sink(sink)
            }
        };
        Ok(stage)
    }
}

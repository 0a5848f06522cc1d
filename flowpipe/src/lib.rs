pub mod cache;
pub mod config;
pub mod error;
pub mod idgen;
pub mod link;
pub mod notification_queue;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod stage;
pub mod transforms;
pub mod unit;

// Re-export idgen types for convenience
pub use idgen::{Handle, HandleType, IdGen, IntCanBeHandle};

// Re-export link types for convenience
pub use link::{Link, LinkError, LinkStats, Reader, Writer};

// Re-export data unit types
pub use unit::{DataUnit, DecodeError, Mode};

// Re-export stage interfaces and built-in stages
pub use sinks::{CacheSink, CollectSink, Collected, HttpSink, LogSink};
pub use sources::{CounterSource, FileSource, SequenceSource};
pub use stage::{Capability, Sink, Source, Stage, StageConfig, StageFuture, Transform};
pub use transforms::{FnTransform, LinesTransform, WrapTransform};

// Re-export cache types
pub use cache::{CacheError, CacheStore, MemCache};

// Re-export the coordinator
pub use error::{BoxError, PipelineError};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineReport, PipelineState, StopHandle};

// Re-export configuration
pub use config::{ConfigError, Context, PipelineSpec, SinkSpec, SourceSpec, TransformSpec};

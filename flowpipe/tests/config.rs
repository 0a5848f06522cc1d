use flowpipe::{
    ConfigError, Context, MemCache, Mode, PipelineError, PipelineSpec, SinkSpec, SourceSpec,
    TransformSpec,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

#[test]
fn test_parse_full_declaration() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "bytes"
high_water_mark = 4096

[source]
kind = "file"
path = "input.txt"
chunk_size = 16

[[transforms]]
kind = "lines"

[[transforms]]
kind = "wrap"
key = "line"
high_water_mark = 128

[sink]
kind = "http"
url = "http://127.0.0.1:8000/"
timeout_ms = 250
"#,
    )
    .unwrap();

    assert_eq!(spec.mode, Mode::Bytes);
    assert_eq!(spec.high_water_mark, Some(4096));
    assert_eq!(
        spec.source,
        SourceSpec::File {
            path: "input.txt".into(),
            chunk_size: Some(16),
            name: None,
            high_water_mark: None,
        }
    );
    assert_eq!(spec.transforms.len(), 2);
    assert_eq!(
        spec.transforms[1],
        TransformSpec::Wrap {
            key: Some("line".to_string()),
            name: None,
            high_water_mark: Some(128),
        }
    );
    assert!(matches!(spec.sink, SinkSpec::Http { timeout_ms: Some(250), .. }));

    let pipeline = spec.build(&Context::new()).unwrap();
    let stats = pipeline.link_stats();
    // min(4096, 4096), min(4096, 128), min(128, 4096)
    let capacities: Vec<usize> = stats.iter().map(|s| s.capacity).collect();
    assert_eq!(capacities, vec![4096, 128, 128]);
}

#[test]
fn test_defaults() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "object"

[source]
kind = "counter"

[sink]
kind = "log"
"#,
    )
    .unwrap();

    assert_eq!(
        spec.source,
        SourceSpec::Counter {
            from: 1,
            to: 100_000,
            name: None,
            high_water_mark: None,
        }
    );
    assert!(spec.transforms.is_empty());
    assert_eq!(
        spec.sink,
        SinkSpec::Log {
            parse: false,
            name: None,
            high_water_mark: None,
        }
    );

    let pipeline = spec.build(&Context::new()).unwrap();
    assert_eq!(pipeline.link_stats()[0].capacity, 16);
}

#[test]
fn test_unknown_kind_is_parse_error() {
    let err = PipelineSpec::from_toml_str(
        r#"
mode = "object"

[source]
kind = "kafka"

[sink]
kind = "log"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "{err}");
}

#[test]
fn test_cache_sink_needs_cache() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "object"

[source]
kind = "counter"
to = 3

[sink]
kind = "cache"
namespace = "docs"
"#,
    )
    .unwrap();

    let err = spec.build(&Context::new()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
}

#[tokio::test]
async fn test_empty_counter_range_runs_empty() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "object"

[source]
kind = "counter"
from = 5
to = 4

[sink]
kind = "log"
"#,
    )
    .unwrap();

    let report = spec.build(&Context::new()).unwrap().run().await.unwrap();
    assert_eq!(report.produced, 0);
    assert_eq!(report.acknowledged, 0);
}

#[test]
fn test_bad_url_is_invalid() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "object"

[source]
kind = "counter"

[sink]
kind = "http"
url = "not a url"
"#,
    )
    .unwrap();

    let err = spec.build(&Context::new()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
}

#[test]
fn test_byte_only_stage_in_object_pipeline() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "object"

[source]
kind = "file"
path = "input.txt"

[sink]
kind = "log"
"#,
    )
    .unwrap();

    let err = spec.build(&Context::new()).unwrap_err();
    assert!(
        matches!(err, ConfigError::Pipeline(PipelineError::Config(_))),
        "{err}"
    );
}

#[test]
fn test_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
mode = "object"

[source]
kind = "sequence"
units = [1, 2]

[sink]
kind = "log"
"#
    )
    .unwrap();

    let spec = PipelineSpec::from_path(file.path()).unwrap();
    assert!(matches!(spec.source, SourceSpec::Sequence { ref units, .. } if units.len() == 2));

    let err = PipelineSpec::from_path("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "{err}");
}

#[tokio::test]
async fn test_declared_pipeline_runs_into_cache() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "object"
high_water_mark = 2

[source]
kind = "sequence"
units = [{ _id = "a", n = 1 }, { n = 2 }]

[[transforms]]
kind = "wrap"
key = "doc"

[sink]
kind = "cache"
name = "store"
namespace = "docs"
ttl_secs = 60
"#,
    )
    .unwrap();

    let cache = Arc::new(MemCache::new());
    let context = Context::new().with_cache(Arc::clone(&cache));
    let report = spec.build(&context).unwrap().run().await.unwrap();

    assert_eq!(report.acknowledged, 2);
    assert_eq!(cache.keys("docs"), vec!["id-0".to_string(), "id-1".to_string()]);
    assert_eq!(
        flowpipe::CacheStore::get(cache.as_ref(), "docs", "id-0").await.unwrap(),
        Some(json!({"doc": {"_id": "a", "n": 1}}))
    );
}

#[tokio::test]
async fn test_declared_byte_sequence() {
    let spec = PipelineSpec::from_toml_str(
        r#"
mode = "bytes"

[source]
kind = "sequence"
units = ["Lorem ipsum\n", { count = 1 }]

[sink]
kind = "log"
parse = true
"#,
    )
    .unwrap();

    let report = spec.build(&Context::new()).unwrap().run().await.unwrap();
    assert_eq!(report.acknowledged, 2);
}

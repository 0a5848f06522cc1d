//! Command line front-end: load a pipeline declaration, run it, report

use flowpipe::{Context, MemCache, PipelineReport, PipelineSpec, SinkSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const USAGE: &str = "usage: flowpipe [--check] [--stop-after-ms N] <pipeline.toml>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub config: PathBuf,
    /// Only build the pipeline, do not run it
    pub check: bool,
    /// Request a stop after this long
    pub stop_after: Option<Duration>,
}

/// Parse the arguments following the program name
///
/// # Errors
///
/// Returns a message for unknown flags, a missing or malformed flag value,
/// or a missing or repeated config path.
pub fn parse_args<I>(args: I) -> Result<Args, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut check = false;
    let mut stop_after = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--check" => check = true,
            "--stop-after-ms" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--stop-after-ms needs a value".to_string())?;
                let ms: u64 = value
                    .parse()
                    .map_err(|e| format!("--stop-after-ms `{value}`: {e}"))?;
                stop_after = Some(Duration::from_millis(ms));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag `{flag}`")),
            path => {
                if config.is_some() {
                    return Err(format!("unexpected argument `{path}`"));
                }
                config = Some(PathBuf::from(path));
            }
        }
    }

    let config = config.ok_or_else(|| "missing pipeline config path".to_string())?;
    Ok(Args {
        config,
        check,
        stop_after,
    })
}

/// Build and run the declared pipeline
///
/// Returns `None` in check mode.
///
/// # Errors
///
/// The rendered config or pipeline error.
pub async fn run(args: &Args) -> Result<Option<PipelineReport>, String> {
    let spec = PipelineSpec::from_path(&args.config).map_err(|e| e.to_string())?;
    let cache = Arc::new(MemCache::new());
    let context = Context::new().with_cache(Arc::clone(&cache));
    let pipeline = spec.build(&context).map_err(|e| e.to_string())?;

    if args.check {
        info!(config = %args.config.display(), pipeline = ?pipeline, "pipeline is valid");
        return Ok(None);
    }

    let timer = args.stop_after.map(|after| {
        let stop = pipeline.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            stop.stop();
        })
    });

    let result = pipeline.run().await;
    if let Some(timer) = timer {
        timer.abort();
    }

    if let SinkSpec::Cache { namespace, .. } = &spec.sink {
        info!(namespace = %namespace, keys = ?cache.keys(namespace), "cache content");
    }
    result.map(Some).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_path_only() {
        let parsed = parse_args(args(&["p.toml"])).unwrap();
        assert_eq!(parsed.config, PathBuf::from("p.toml"));
        assert!(!parsed.check);
        assert_eq!(parsed.stop_after, None);
    }

    #[test]
    fn test_parse_flags() {
        let parsed = parse_args(args(&["--check", "--stop-after-ms", "250", "p.toml"])).unwrap();
        assert!(parsed.check);
        assert_eq!(parsed.stop_after, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["--stop-after-ms"])).is_err());
        assert!(parse_args(args(&["--stop-after-ms", "soon", "p.toml"])).is_err());
        assert!(parse_args(args(&["--verbose", "p.toml"])).is_err());
        assert!(parse_args(args(&["a.toml", "b.toml"])).is_err());
    }
}

//! Pipeline error kinds
//!
//! Stage implementations fail with a [`BoxError`]; the coordinator
//! classifies it by the role of the stage that produced it.

/// Error type returned by stage implementations
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal failure of a pipeline run, or an invalid pipeline layout
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source `{stage}` failed: {source}")]
    Production {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("transform `{stage}` failed: {source}")]
    Transform {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("sink `{stage}` failed: {source}")]
    Consume {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid pipeline: {0}")]
    Config(String),
}

impl PipelineError {
    /// Name of the stage that failed, if the error comes from a stage
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Production { stage, .. }
            | Self::Transform { stage, .. }
            | Self::Consume { stage, .. } => Some(stage),
            Self::Config(_) => None,
        }
    }

    /// The underlying stage error
    #[must_use]
    pub fn stage_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Production { source, .. }
            | Self::Transform { source, .. }
            | Self::Consume { source, .. } => Some(source.as_ref()),
            Self::Config(_) => None,
        }
    }

    pub(crate) fn production(stage: &str, source: impl Into<BoxError>) -> Self {
        Self::Production {
            stage: stage.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn transform(stage: &str, source: impl Into<BoxError>) -> Self {
        Self::Transform {
            stage: stage.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn consume(stage: &str, source: impl Into<BoxError>) -> Self {
        Self::Consume {
            stage: stage.to_string(),
            source: source.into(),
        }
    }
}

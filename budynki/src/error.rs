use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error kinds surfaced by the acquisition pipeline.
///
/// Recoverable conditions (empty result sets, a missing optional local
/// override) are logged and absorbed by the fetchers, never raised.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown study area {key:?} (available: {})", .known.join(", "))]
    UnknownArea { key: String, known: Vec<String> },

    #[error("{service} unavailable: {source}")]
    SourceUnavailable {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("study area {area:?} has no TERYT county code, cannot build an archive URL")]
    MissingRegionCode { area: String },

    #[error("archive {archive} is unusable: {reason}")]
    MalformedArchive { archive: String, reason: String },

    #[error("all sources exhausted for study area {area:?}: {}", .causes.join("; "))]
    AllSourcesExhausted { area: String, causes: Vec<String> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

use thiserror::Error;
use tokio::task::JoinError;

/// Single error taxonomy shared by every crate in the workspace.
///
/// Boundary error kinds (spec.md §6) are modeled as distinct variants rather
/// than strings so callers can match on `kind()` instead of parsing
/// messages.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal service error: {0}")]
    InternalError(String),

    // --- crawler (C6) ---
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),
    #[error("policy blocked: {0}")]
    PolicyBlocked(String),

    // --- chunker (C5) ---
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("extraction produced no text")]
    ExtractionEmpty,

    // --- embedding provider (C1) ---
    #[error("embedding rate limited")]
    EmbedRateLimited,
    #[error("embedding rejected: {0}")]
    EmbedRejected(String),
    #[error("embedding provider unavailable")]
    EmbedUnavailable,

    // --- stores (C3/C4) ---
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store corrupt: {0}")]
    StoreCorrupt(String),
    #[error("no path found between nodes")]
    NoPath,
    #[error("DEPENDS_ON edge would introduce a cycle")]
    CycleRejected,

    // --- query engine (C8) ---
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl AppError {
    /// Whether retrying the operation that produced this error might succeed,
    /// per spec.md §7's transient-I/O taxonomy.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Reqwest(_)
                | Self::SourceUnreachable(_)
                | Self::EmbedRateLimited
                | Self::EmbedUnavailable
                | Self::StoreUnavailable(_)
        )
    }

    /// The boundary error kind name, used in progress events and query
    /// result provenance (spec.md §6).
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnreachable(_) => "SourceUnreachable",
            Self::PolicyBlocked(_) => "PolicyBlocked",
            Self::UnsupportedContentType(_) => "UnsupportedContentType",
            Self::ExtractionEmpty => "ExtractionEmpty",
            Self::EmbedRateLimited => "EmbedRateLimited",
            Self::EmbedRejected(_) => "EmbedRejected",
            Self::EmbedUnavailable => "EmbedUnavailable",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::StoreCorrupt(_) => "StoreCorrupt",
            Self::NoPath => "NoPath",
            Self::CycleRejected => "CycleRejected",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::InvalidQuery(_) => "InvalidQuery",
            _ => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_spec_transient_taxonomy() {
        assert!(AppError::EmbedRateLimited.is_retryable());
        assert!(AppError::EmbedUnavailable.is_retryable());
        assert!(AppError::StoreUnavailable("down".into()).is_retryable());
        assert!(!AppError::PolicyBlocked("robots".into()).is_retryable());
        assert!(!AppError::ExtractionEmpty.is_retryable());
        assert!(!AppError::InvalidQuery("empty".into()).is_retryable());
    }

    #[test]
    fn kind_names_match_boundary_vocabulary() {
        assert_eq!(AppError::NoPath.kind(), "NoPath");
        assert_eq!(AppError::DeadlineExceeded.kind(), "DeadlineExceeded");
        assert_eq!(AppError::CycleRejected.kind(), "CycleRejected");
    }
}

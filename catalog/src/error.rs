//! Error taxonomy for the catalog layer.

use thiserror::Error;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors surfaced by the catalog layer.
///
/// Errors are `Clone` because a single coalesced load hands its outcome to every waiter; transport
/// failures are therefore captured as messages rather than wrapped sources.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The upstream reported that the metered quota for the current period is exhausted.
    #[error("upstream quota exceeded")]
    QuotaExceeded,

    /// Any other failure from the upstream after the retry budget was spent.
    #[error("upstream error ({}): {message}", status_label(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// A duration string from upstream data did not match `PT[nH][nM][nS]`.
    #[error("malformed duration: {0:?}")]
    MalformedDuration(String),

    /// Required configuration (usually the API credential) is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An upstream response did not match the expected schema for its endpoint.
    #[error("could not decode {endpoint} response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },

    /// The raw key-value store could not be reached.
    #[error("cache store error: {0}")]
    Store(String),

    /// The load a caller was waiting on went away without settling.
    #[error("load for {key} was abandoned before settling")]
    LoadAbandoned { key: String },
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "transport".to_string(),
    }
}

impl CatalogError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn store(message: impl std::fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded)
    }

    /// Server-side and transport failures are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status: None, .. } => true,
            Self::Upstream {
                status: Some(status),
                ..
            } => *status >= 500,
            _ => false,
        }
    }
}

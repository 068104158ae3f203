//! Error types for collabflow operations.
//!
//! Two layers of errors exist: [`ProviderError`] describes why a single
//! provider call did not produce entities, and [`CollabError`] is what the
//! orchestration layer hands back to its caller.

use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias for collabflow operations.
pub type CollabResult<T> = Result<T, CollabError>;

/// Failure of a single provider call (or the reason it was never made).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider did not answer before the deadline.
    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The provider rejected the call because of rate limiting.
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Credentials were missing, expired or rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The provider answered, but the payload could not be turned into entities.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Any other transport or API failure.
    #[error("Request failed: {0}")]
    Request(String),

    /// The name is listed in a strategy but no provider is configured for it.
    #[error("Provider not configured")]
    NotConfigured,

    /// The circuit breaker refused the call.
    #[error("Circuit breaker open")]
    CircuitOpen,

    /// The spawned task driving the call panicked or was aborted.
    #[error("Provider task failed: {0}")]
    TaskFailed(String),
}

impl ProviderError {
    /// Create a generic request error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Create a rate limit error without a retry hint.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::ProviderTimeout,
            Self::RateLimited { .. } => ErrorCode::ProviderRateLimited,
            Self::Authentication(_) => ErrorCode::ProviderAuthentication,
            Self::MalformedResponse(_) => ErrorCode::ProviderMalformedResponse,
            Self::Request(_) => ErrorCode::ProviderRequestFailed,
            Self::NotConfigured => ErrorCode::ProviderNotConfigured,
            Self::CircuitOpen => ErrorCode::ProviderCircuitOpen,
            Self::TaskFailed(_) => ErrorCode::Internal,
        }
    }
}

/// Main error type for orchestration operations.
#[derive(Error, Debug)]
pub enum CollabError {
    /// Every attempted provider failed during one extraction.
    #[error("All providers failed: {}", format_provider_errors(.errors))]
    AllProvidersFailed {
        /// Per-provider failure, keyed by provider name.
        errors: BTreeMap<String, ProviderError>,
    },

    /// Configuration defect. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        suggestion: Option<String>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Provider (PROV_xxx)
    ProviderTimeout,
    ProviderRateLimited,
    ProviderAuthentication,
    ProviderMalformedResponse,
    ProviderRequestFailed,
    ProviderNotConfigured,
    ProviderCircuitOpen,

    // Orchestration (ORC_xxx)
    AllProvidersFailed,

    // Configuration (CFG_xxx)
    ConfigInvalid,

    // Validation (VAL_xxx)
    ValInvalidInput,
    ValOutOfRange,

    // Persistence (IO_xxx)
    IoFailed,
    SerializationFailed,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProviderTimeout => "PROV_001",
            ErrorCode::ProviderRateLimited => "PROV_002",
            ErrorCode::ProviderAuthentication => "PROV_003",
            ErrorCode::ProviderMalformedResponse => "PROV_004",
            ErrorCode::ProviderRequestFailed => "PROV_005",
            ErrorCode::ProviderNotConfigured => "PROV_006",
            ErrorCode::ProviderCircuitOpen => "PROV_007",
            ErrorCode::AllProvidersFailed => "ORC_001",
            ErrorCode::ConfigInvalid => "CFG_001",
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValOutOfRange => "VAL_002",
            ErrorCode::IoFailed => "IO_001",
            ErrorCode::SerializationFailed => "IO_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl CollabError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an out-of-range validation error with a suggestion.
    pub fn out_of_range(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValOutOfRange,
            suggestion: Some(suggestion.into()),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AllProvidersFailed { .. } => ErrorCode::AllProvidersFailed,
            Self::Configuration(_) => ErrorCode::ConfigInvalid,
            Self::Validation { code, .. } => *code,
            Self::Io(_) => ErrorCode::IoFailed,
            Self::Serialization(_) => ErrorCode::SerializationFailed,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::AllProvidersFailed { .. } => {
                Some("Check provider credentials and health metrics, then retry later")
            }
            Self::Configuration(_) => Some("Please check your orchestration configuration"),
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }

    /// Per-provider errors carried by an aggregate failure.
    pub fn provider_errors(&self) -> Option<&BTreeMap<String, ProviderError>> {
        match self {
            Self::AllProvidersFailed { errors } => Some(errors),
            _ => None,
        }
    }
}

fn format_provider_errors(errors: &BTreeMap<String, ProviderError>) -> String {
    if errors.is_empty() {
        return "no providers were attempted".to_string();
    }
    errors
        .iter()
        .map(|(name, err)| format!("{}: {}", name, err))
        .collect::<Vec<_>>()
        .join("; ")
}

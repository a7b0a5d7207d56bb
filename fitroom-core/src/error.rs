use crate::types::Slot;

/// Top-level fitroom error type.
///
/// All fallible operations in `fitroom-core` return [`Result<T, FitroomError>`](Result).
/// Each variant wraps a domain-specific error enum, allowing callers to
/// match on the error source without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum FitroomError {
    /// Error from an AI oracle (image generation, fit, measurement estimation).
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Invalid combination rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A garment reference image could not be fetched or decoded.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Error from the persistence layer (cost records, saved outfits).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl FitroomError {
    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Oracle(e) => e.is_retryable(),
            Self::Fetch(_) => true,
            Self::Validation(_) | Self::Store(_) | Self::Config(_) => false,
        }
    }
}

/// How the oracle turned a request down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Authentication or permission failure (HTTP 403 / `PERMISSION_DENIED`).
    PermissionDenied,
    /// Temporary internal failure on the oracle side (HTTP 5xx / `INTERNAL`).
    Transient,
    /// Any other structured error.
    Other,
}

/// Errors from AI oracle interactions.
#[derive(thiserror::Error, Debug)]
pub enum OracleError {
    /// The client or its credentials are not configured.
    #[error("The AI service is not configured: {0}")]
    Unavailable(String),

    /// Structured error returned by the oracle, already mapped to a user-readable message.
    #[error("{message}")]
    Rejected {
        /// Classification used by the retry policy.
        kind: RejectionKind,
        /// User-readable description.
        message: String,
    },

    /// The oracle answered but produced no usable image or candidate.
    #[error("{0}")]
    EmptyResponse(String),

    /// Network-level failure reaching the oracle.
    #[error("Network error: {0}")]
    Network(String),

    /// The oracle payload did not match the expected contract.
    #[error("Response parse error: {0}")]
    Parse(String),
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => false,
            Self::Rejected { kind, .. } => *kind != RejectionKind::PermissionDenied,
            Self::EmptyResponse(_) | Self::Network(_) | Self::Parse(_) => true,
        }
    }

    /// Map a structured oracle error (`{"error": {code, status, message}}`)
    /// to a user-readable rejection.
    pub fn from_api_error(code: Option<u16>, status: Option<&str>, message: Option<&str>) -> Self {
        if code == Some(403) || status == Some("PERMISSION_DENIED") {
            return Self::Rejected {
                kind: RejectionKind::PermissionDenied,
                message: "Authentication failed. Please ensure the application's AI service is \
                          correctly configured and has the necessary permissions."
                    .to_string(),
            };
        }
        if code == Some(500) || status == Some("INTERNAL") {
            return Self::Rejected {
                kind: RejectionKind::Transient,
                message: "The AI service encountered a temporary internal issue. Please try \
                          again in a moment."
                    .to_string(),
            };
        }
        let detail = message.unwrap_or("unknown error");
        let kind = match code {
            Some(429 | 502..=504) => RejectionKind::Transient,
            _ => RejectionKind::Other,
        };
        Self::Rejected {
            kind,
            message: format!("AI service error: {detail}"),
        }
    }
}

/// Invalid selections or inputs, rejected before any oracle call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Neither slot has a garment with a chosen size.
    #[error("At least one garment must be selected with a size")]
    NoGarmentSelected,

    /// A selected garment has no chosen size yet.
    #[error("No size chosen for the {0} garment")]
    MissingSize(Slot),

    /// Measurements are missing or non-positive.
    #[error("Incomplete measurements: {0}")]
    IncompleteMeasurements(String),

    /// A fit recommendation violated its contract.
    #[error("Invalid fit recommendation: {0}")]
    InvalidRecommendation(String),

    /// No size chart is available to recommend against.
    #[error("No size chart available for the {0} garment")]
    NoSizeChart(Slot),
}

/// Failures fetching or decoding a garment reference image.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// Remote server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    Http {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Transport-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The payload could not be decoded (bad base64, malformed data URI).
    #[error("Decode error: {0}")]
    Decode(String),

    /// The resource existed but had no bytes.
    #[error("Empty image body from {0}")]
    EmptyBody(String),
}

/// Errors from the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization of a stored payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in fitroom configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, FitroomError>`.
pub type Result<T> = std::result::Result<T, FitroomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_are_not_retried() {
        let err = OracleError::from_api_error(Some(403), None, Some("denied"));
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("Authentication failed"));

        let err = OracleError::from_api_error(None, Some("PERMISSION_DENIED"), None);
        assert!(matches!(
            err,
            OracleError::Rejected {
                kind: RejectionKind::PermissionDenied,
                ..
            }
        ));
    }

    #[test]
    fn internal_errors_are_transient() {
        let err = OracleError::from_api_error(Some(500), Some("INTERNAL"), Some("boom"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("temporary internal issue"));
    }

    #[test]
    fn other_errors_carry_their_message() {
        let err = OracleError::from_api_error(Some(400), Some("INVALID_ARGUMENT"), Some("bad part"));
        assert_eq!(err.to_string(), "AI service error: bad part");
    }

    #[test]
    fn unavailable_is_fatal() {
        let err = FitroomError::from(OracleError::Unavailable("no key".into()));
        assert!(!err.is_retryable());
        let err = FitroomError::from(ValidationError::NoGarmentSelected);
        assert!(!err.is_retryable());
        let err = FitroomError::from(OracleError::EmptyResponse("nothing".into()));
        assert!(err.is_retryable());
    }
}

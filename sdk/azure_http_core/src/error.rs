use std::fmt;

use thiserror::Error;

/// Errors that can occur while sending requests through the pipeline,
/// polling long-running operations, or performing cryptography.
#[derive(Error, Debug)]
pub enum Error {
    /// The connection failed before an HTTP status was obtained
    /// (refused, reset, timed out).
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The service answered with a status the operation did not expect.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The credential could not supply authentication material.
    ///
    /// `status` carries the status code reported by the identity provider,
    /// if it exposed one.
    #[error("Credential error: {message}")]
    Credential { status: Option<u16>, message: String },

    /// The requested capability is not available for this key type or
    /// algorithm and no remote delegate is configured.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A precondition on an argument was violated.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A local cryptographic primitive failed (bad padding, corrupt key).
    #[error("Cryptography error: {0}")]
    Cryptography(String),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint {
        message: String,
        #[source]
        source: Option<url::ParseError>,
    },

    /// A required configuration value is missing.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// A long-running operation ended in a failed or cancelled state.
    #[error("Long-running operation failed: {0}")]
    OperationFailed(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a transport error without an underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a credential error, optionally carrying the provider's status code.
    pub fn credential(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Credential {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid endpoint error from a URL parse failure.
    pub fn invalid_endpoint_with_source(message: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: Some(source),
        }
    }

    /// The HTTP status code embedded in this error, if any.
    ///
    /// Used by the retry policy to classify errors that are not plain
    /// responses (for example identity-provider failures).
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http(e) => Some(e.status),
            Self::Credential { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns the [`HttpError`] if this is an HTTP status error.
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

/// Classification of an unexpected HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    /// 404, or any status a route maps to "not found".
    ResourceNotFound,
    /// 409: the resource was modified concurrently.
    ResourceModified,
    /// 412: the resource already exists.
    ResourceExists,
    /// 401 / 403.
    ClientAuthentication,
    /// A 3xx that exhausted redirect handling.
    TooManyRedirects,
    /// Anything else.
    Other,
}

impl HttpErrorKind {
    /// Default classification used when a route does not map the status.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::ResourceNotFound,
            409 => Self::ResourceModified,
            412 => Self::ResourceExists,
            401 | 403 => Self::ClientAuthentication,
            300..=399 => Self::TooManyRedirects,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResourceNotFound => "resource not found",
            Self::ResourceModified => "resource modified",
            Self::ResourceExists => "resource exists",
            Self::ClientAuthentication => "client authentication",
            Self::TooManyRedirects => "too many redirects",
            Self::Other => "unexpected response",
        };
        f.write_str(s)
    }
}

/// A non-success HTTP status that was successfully received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HTTP error: {status} ({kind}) - {message}")]
pub struct HttpError {
    /// The status code of the response.
    pub status: u16,
    /// How the status was classified.
    pub kind: HttpErrorKind,
    /// Service error code from the `{"error": {"code": ..}}` body, if present.
    pub code: Option<String>,
    /// Sanitized, truncated error message.
    pub message: String,
}

impl HttpError {
    /// Create an error using the default classification for `status`.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: HttpErrorKind::from_status(status),
            code: None,
            message: message.into(),
        }
    }
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, Error>;

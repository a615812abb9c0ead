//! Error types for the embedding client

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// How a failed call is treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The provider asked us to slow down; back off longer.
    RateLimited,
    /// Anything else; standard exponential backoff.
    Other,
}

/// Error type for all embedding operations.
///
/// Provider failures fall into three categories that the caller cares about:
///
/// - **Authentication** ([`EmbedError::Auth`]): the credential is missing or
///   rejected. No call can succeed, so the pipeline treats this as fatal.
/// - **Rate limiting** ([`EmbedError::RateLimited`]): retried with the longer
///   backoff schedule.
/// - **Transient** ([`EmbedError::Transient`], [`EmbedError::Timeout`]): network
///   or server faults, retried with the standard schedule.
///
/// The remaining variants describe malformed responses, configuration problems,
/// and the aggregate outcomes of a batched request.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Missing or rejected credential
    #[error("Embedding authentication failed: {message}")]
    Auth { message: String },

    /// The provider's rate limit was hit
    #[error("Embedding rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Network fault or server-side error
    #[error("Transient embedding failure: {message}")]
    Transient { message: String },

    /// The provider rejected the request for another reason
    #[error("Embedding provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// The provider answered, but not with what was asked for
    #[error("Invalid embedding response: {message}")]
    InvalidResponse { message: String },

    /// A single call exceeded the per-call timeout
    #[error("Embedding request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Every input was empty or over the token ceiling
    #[error("No valid texts to embed ({skipped} skipped)")]
    NoValidTexts { skipped: usize },

    /// Every batch window exhausted its retries
    #[error("All {batches} embedding batches failed; last error: {last_error}")]
    AllBatchesFailed { batches: usize, last_error: String },

    /// Error when client configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },
}

impl EmbedError {
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    ///
    /// Used when validating [`crate::EmbedConfig`] values such as a zero batch
    /// size or a zero concurrency ceiling.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Classify this error for backoff purposes.
    ///
    /// Only the provider's explicit rate-limit signal earns the longer delay;
    /// every other failure, authentication included, uses the standard one.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            EmbedError::RateLimited { .. } => FailureClass::RateLimited,
            _ => FailureClass::Other,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, EmbedError::Auth { .. })
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EmbedError::invalid_response(err.to_string())
        } else {
            EmbedError::transient(err.to_string())
        }
    }
}

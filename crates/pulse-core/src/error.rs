use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while syncing
/// activity data. It uses the `thiserror` crate for ergonomic error handling
/// and automatic conversion from underlying library errors.
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Classification
///
/// Remote failures are split by who is at fault:
/// - [`AppError::RemoteRejected`] is a 4xx answer (bad credentials, unknown
///   project, malformed request). Retrying will not help and the circuit
///   breaker must not count it.
/// - [`AppError::ServerError`], [`AppError::Timeout`], [`AppError::NetworkError`]
///   and [`AppError::RateLimitExceeded`] are transient. They are retried and
///   tracked by the circuit breaker.
///
/// # Examples
///
/// ```
/// use pulse_core::error::AppError;
///
/// let err = AppError::RemoteRejected { status: 401, message: "bad token".into() };
/// assert!(!err.is_retryable());
/// assert!(err.is_client_rejection());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps all errors from SQLx, including connection failures and query errors.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// A uniqueness constraint fired outside the upsert conflict path.
    ///
    /// This means another writer touched the same natural key through a
    /// plain insert. It is never swallowed.
    #[error("Constraint violation on {table}: {message}")]
    ConstraintViolation { table: String, message: String },

    /// The remote API refused the request (HTTP 4xx other than 429).
    #[error("Remote rejected request (HTTP {status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// The remote API failed (HTTP 5xx).
    #[error("Remote server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// HTTP client request failed for a reason not covered above.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429 or an exhausted GitHub quota).
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// No configuration exists for the tenant.
    #[error("Tenant config not found: {0}")]
    ConfigNotFound(i64),

    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check DATABASE_URL.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::RemoteRejected { status, message } => match status {
                401 | 403 => format!(
                    "The source API rejected the credentials (HTTP {}).\n   Check the tenant's API token.",
                    status
                ),
                404 => format!(
                    "Project or repository not found (HTTP 404): {}\n   Check the tenant's project key or repository URL.",
                    message
                ),
                _ => format!("The source API rejected the request (HTTP {}): {}", status, message),
            },
            AppError::ServerError { status, .. } => {
                format!(
                    "The source API is failing (HTTP {}).\n   Try again later.",
                    status
                )
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The server may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::ConfigNotFound(id) => {
                format!(
                    "No configuration found for tenant {}.\n   Check your tenants file.",
                    id
                )
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulse_core::error::AppError;
    ///
    /// let err = AppError::ServerError { status: 503, message: "unavailable".into() };
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::RemoteRejected { status: 404, message: "no such repo".into() };
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
                | AppError::ServerError { .. }
        )
    }

    /// Returns true if this error should count as a circuit breaker failure.
    ///
    /// Only transient remote failures count. A 4xx is a data-level outcome
    /// for one tenant and says nothing about the health of the remote API.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::ServerError { .. } => true,

            AppError::ClientError(_)
            | AppError::RemoteRejected { .. }
            | AppError::DatabaseError(_)
            | AppError::ConstraintViolation { .. }
            | AppError::SerializationError(_)
            | AppError::InvalidUrl(_)
            | AppError::ConfigNotFound(_)
            | AppError::ConfigError(_)
            | AppError::Generic(_) => false,
        }
    }

    /// Returns true if the remote side rejected the request (4xx).
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, AppError::RemoteRejected { .. })
    }

    /// Classifies an HTTP status into the matching error variant.
    ///
    /// 429 maps to [`AppError::RateLimitExceeded`], other 4xx to
    /// [`AppError::RemoteRejected`], 5xx to [`AppError::ServerError`].
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => AppError::RateLimitExceeded,
            400..=499 => AppError::RemoteRejected {
                status,
                message: message.into(),
            },
            500..=599 => AppError::ServerError {
                status,
                message: message.into(),
            },
            _ => AppError::ClientError(format!("Unexpected HTTP {}: {}", status, message.into())),
        }
    }
}

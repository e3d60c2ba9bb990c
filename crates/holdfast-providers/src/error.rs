//! Error types for calendar adapter operations.
//!
//! Every adapter operation fails with an [`AdapterError`]. The error code
//! tells the orchestration layer how to react:
//!
//! - `AuthenticationFailed`: credential invalid or expired after one refresh
//!   attempt; fatal for that adapter only
//! - `AvailabilityFailed`: the adapter contributes nothing to this query
//! - `ProvisionalHoldFailed`: triggers rollback during hold creation,
//!   surfaced as-is during confirm and release
//! - `WebhookFailed`: logged, never fatal
//!
//! Low-level HTTP clients report transport codes (`NetworkError`,
//! `RateLimited`, ...). Adapters reclassify them into the operation category
//! with [`AdapterError::during`], which keeps the retryable flag.

use std::fmt;
use thiserror::Error;

/// The category of an adapter error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterErrorCode {
    /// Credentials are invalid or expired and could not be refreshed.
    AuthenticationFailed,
    /// Free/busy data could not be obtained.
    AvailabilityFailed,
    /// A provisional hold could not be created, confirmed or released.
    ProvisionalHoldFailed,
    /// A push-notification subscription could not be managed.
    WebhookFailed,
    /// Generic event CRUD failed.
    EventFailed,
    /// The target resource does not exist (or no longer exists).
    NotFound,
    /// Network error - connection failed, timeout, DNS resolution, etc.
    NetworkError,
    /// Rate limit or quota exceeded.
    RateLimited,
    /// Server returned an error (5xx status codes).
    ServerError,
    /// Invalid response from the server - parse error, unexpected format.
    InvalidResponse,
    /// Configuration error - missing or invalid config.
    ConfigurationError,
    /// Internal adapter error - unexpected state, bug.
    InternalError,
}

impl AdapterErrorCode {
    /// Returns true if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::RateLimited | Self::ServerError
        )
    }

    /// Returns true for transport-level codes that adapters reclassify.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::RateLimited | Self::ServerError | Self::InvalidResponse
        )
    }

    /// Returns a machine-readable name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AvailabilityFailed => "availability_failed",
            Self::ProvisionalHoldFailed => "provisional_hold_failed",
            Self::WebhookFailed => "webhook_failed",
            Self::EventFailed => "event_failed",
            Self::NotFound => "not_found",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::ConfigurationError => "configuration_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for AdapterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error that occurred while interacting with a calendar adapter.
#[derive(Debug, Error)]
pub struct AdapterError {
    code: AdapterErrorCode,
    message: String,
    /// The adapter that generated this error.
    adapter: Option<String>,
    retryable: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AdapterError {
    /// Creates a new adapter error with the given code and message.
    pub fn new(code: AdapterErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            adapter: None,
            retryable: code.is_retryable(),
            source: None,
        }
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::AuthenticationFailed, message)
    }

    /// Creates an availability error.
    pub fn availability(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::AvailabilityFailed, message)
    }

    /// Creates a provisional hold error.
    pub fn provisional_hold(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::ProvisionalHoldFailed, message)
    }

    /// Creates a webhook error.
    pub fn webhook(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::WebhookFailed, message)
    }

    /// Creates an event CRUD error.
    pub fn event(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::EventFailed, message)
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::NotFound, message)
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::NetworkError, message)
    }

    /// Creates a rate limit error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::RateLimited, message)
    }

    /// Creates a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::ServerError, message)
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::InvalidResponse, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::ConfigurationError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorCode::InternalError, message)
    }

    /// Sets the adapter name for this error.
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Reclassifies a transport-level error into an operation category.
    ///
    /// Authentication, not-found, configuration and already-categorized
    /// errors are returned unchanged. The retryable flag survives.
    pub fn during(mut self, code: AdapterErrorCode) -> Self {
        if self.code.is_transport() {
            self.message = format!("{}: {}", self.code, self.message);
            self.code = code;
        }
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> AdapterErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the adapter name, if set.
    pub fn adapter(&self) -> Option<&str> {
        self.adapter.as_deref()
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Returns true if the error reports an invalid or expired credential.
    pub fn is_authentication(&self) -> bool {
        self.code == AdapterErrorCode::AuthenticationFailed
    }

    /// Returns true if the target resource is gone.
    pub fn is_not_found(&self) -> bool {
        self.code == AdapterErrorCode::NotFound
    }

    /// Returns a copy of this error without its source.
    ///
    /// Used where the same failure must be reported to several consumers.
    pub fn detached(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            adapter: self.adapter.clone(),
            retryable: self.retryable,
            source: None,
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref adapter) = self.adapter {
            write!(f, "[{}] ", adapter)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

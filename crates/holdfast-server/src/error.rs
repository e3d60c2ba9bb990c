//! Orchestrator error types.

use std::io;
use std::path::PathBuf;

use holdfast_core::AccountId;
use holdfast_providers::ProvisionalHoldId;
use thiserror::Error;

use crate::hold::{HoldId, HoldState};

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One adapter's failure inside a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterFailure {
    /// The adapter that failed.
    pub adapter_id: AccountId,
    /// Human-readable reason.
    pub reason: String,
    /// True when the call was abandoned after the per-adapter timeout.
    pub timed_out: bool,
    /// True when the underlying error is transient.
    pub retryable: bool,
}

impl AdapterFailure {
    /// Creates a failure from an adapter error.
    pub fn from_error(adapter_id: AccountId, error: &holdfast_providers::AdapterError) -> Self {
        Self {
            adapter_id,
            reason: error.to_string(),
            timed_out: false,
            retryable: error.is_retryable(),
        }
    }

    /// Creates a failure for a call that exceeded the per-adapter timeout.
    pub fn timed_out(adapter_id: AccountId) -> Self {
        Self {
            adapter_id,
            reason: "adapter call timed out".to_string(),
            timed_out: true,
            retryable: true,
        }
    }

    /// Creates a failure for a hold that references an adapter no longer registered.
    pub fn unregistered(adapter_id: AccountId) -> Self {
        Self {
            adapter_id,
            reason: "adapter is not registered".to_string(),
            timed_out: false,
            retryable: false,
        }
    }
}

impl std::fmt::Display for AdapterFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.adapter_id, self.reason)
    }
}

/// Outcome of a compensating step.
///
/// Compensation never raises; what it attempted and what failed is
/// reported here and logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Holds a release was issued for.
    pub attempted: Vec<ProvisionalHoldId>,
    /// Releases that failed.
    pub failed: Vec<AdapterFailure>,
}

impl RollbackReport {
    /// Returns true if every attempted release succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

fn join_failures(failures: &[AdapterFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No active calendar account is connected.
    #[error("no calendars configured")]
    NoCalendarsConfigured,

    /// A caller-supplied argument is out of range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// At least one adapter refused the hold; every sibling was rolled back.
    #[error("hold creation failed: {}", join_failures(.failures))]
    HoldCreationFailed {
        /// Adapters that failed.
        failures: Vec<AdapterFailure>,
        /// Release of the holds that did succeed.
        rollback: RollbackReport,
    },

    /// Another hold is already active for the booking request.
    #[error("a hold is already active for request {request_id}")]
    HoldAlreadyActive { request_id: String },

    /// The hold does not exist.
    #[error("hold not found: {0}")]
    HoldNotFound(HoldId),

    /// The hold is not in the state the operation requires.
    #[error("hold {id} is {state}, expected active")]
    HoldNotActive { id: HoldId, state: HoldState },

    /// The hold expired before it could be confirmed.
    #[error("hold {0} has expired")]
    HoldExpired(HoldId),

    /// Confirmation failed on some adapters and was compensated.
    #[error("confirmation of hold {id} failed: {}", join_failures(.failures))]
    ConfirmFailed {
        id: HoldId,
        /// Adapters that still failed after the retry.
        failures: Vec<AdapterFailure>,
    },

    /// Persistent store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns true if the caller may retry or pick another slot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HoldCreationFailed { .. })
    }
}

/// Errors from a persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error reading or writing the store file.
    #[error("store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The store file is not valid JSON.
    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failure while persisting.
    #[error("failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The requested hold does not exist.
    #[error("hold not found: {0}")]
    HoldNotFound(HoldId),

    /// Compare-and-set failed: the persisted state moved on.
    #[error("hold {id} is {actual}, expected {expected}")]
    StateConflict {
        id: HoldId,
        expected: HoldState,
        actual: HoldState,
    },

    /// An active hold already exists for the request.
    #[error("a hold is already active for request {request_id}")]
    DuplicateRequest { request_id: String },

    /// A hold with the same identifier already exists.
    #[error("hold {0} already exists")]
    DuplicateHold(HoldId),

    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is missing or out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A secret reference could not be resolved.
    #[error("failed to resolve secret: {0}")]
    Secret(String),
}

impl ConfigError {
    /// Creates a validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

//! Connected calendar accounts.
//!
//! A [`CalendarAccount`] is created when an owner completes a provider's
//! consent flow and is soft-deactivated when disconnected. The orchestrator
//! reads the active accounts at start-up to materialize one adapter each.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a connected calendar account.
///
/// The same identifier names the adapter built for the account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an account identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The calendar vendor behind an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Google Calendar.
    Google,
    /// In-process calendar, used for sandboxes and tests.
    Memory,
}

impl ProviderKind {
    /// Returns the short name of the provider kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque access/refresh credential pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// Access token for API requests.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: Option<String>,
    /// When the access token expires, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialBundle {
    /// Safety margin subtracted from the expiry instant.
    pub const EXPIRY_MARGIN_SECS: i64 = 60;

    /// Creates a credential bundle.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Returns true if the access token is expired or about to expire.
    ///
    /// A bundle without an expiry is assumed valid.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Same as [`is_expired`](Self::is_expired) against an explicit clock.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at - Duration::seconds(Self::EXPIRY_MARGIN_SECS),
            None => false,
        }
    }

    /// Returns true if the bundle can be refreshed.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One connected calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarAccount {
    /// Account identifier.
    pub id: AccountId,
    /// Owning user identifier.
    pub owner_id: String,
    /// Provider kind.
    pub kind: ProviderKind,
    /// Tie-break ordering, highest first.
    #[serde(default)]
    pub priority: i32,
    /// Soft-delete flag.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Provider calendar identifier; `None` means the provider default.
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// Opaque credential bundle.
    pub credentials: CredentialBundle,
}

fn default_active() -> bool {
    true
}

impl CalendarAccount {
    /// Creates an active account with priority 0.
    pub fn new(
        id: impl Into<AccountId>,
        owner_id: impl Into<String>,
        kind: ProviderKind,
        credentials: CredentialBundle,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            kind,
            priority: 0,
            active: true,
            calendar_id: None,
            credentials,
        }
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the provider calendar identifier.
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = Some(calendar_id.into());
        self
    }

    /// Marks the account as disconnected.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

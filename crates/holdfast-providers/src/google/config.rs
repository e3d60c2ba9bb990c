//! Google Calendar adapter configuration.

use std::path::PathBuf;
use std::time::Duration;

/// OAuth 2.0 client credentials for Google API access.
///
/// The consent flow itself happens outside the orchestrator; these
/// credentials are only used to refresh access tokens.
#[derive(Clone)]
pub struct OAuthCredentials {
    /// The OAuth 2.0 client ID from Google Cloud Console.
    pub client_id: String,
    /// The OAuth 2.0 client secret from Google Cloud Console.
    pub client_secret: String,
}

impl OAuthCredentials {
    /// Creates new OAuth credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Validates that the credentials appear to be correctly formatted.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client_id.is_empty() {
            return Err("client_id is required");
        }
        if !self.client_id.ends_with(".apps.googleusercontent.com") {
            return Err("client_id should end with .apps.googleusercontent.com");
        }
        if self.client_secret.is_empty() {
            return Err("client_secret is required");
        }
        Ok(())
    }
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Configuration for one Google Calendar adapter.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth credentials used for token refresh.
    pub credentials: OAuthCredentials,

    /// Calendar the adapter reads and writes. Defaults to `"primary"`.
    pub calendar_id: String,

    /// Request timeout.
    pub timeout: Duration,

    /// User agent string for API requests.
    pub user_agent: String,

    /// Calendar API v3 base URL.
    pub api_base_url: String,

    /// OAuth token endpoint.
    pub token_url: String,

    /// Where refreshed tokens are persisted, if anywhere.
    pub token_path: Option<PathBuf>,

    /// Title given to tentative hold events.
    pub hold_summary: String,
}

impl GoogleConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Production Calendar API base URL.
    pub const DEFAULT_API_BASE_URL: &'static str = "https://www.googleapis.com/calendar/v3";

    /// Production OAuth token endpoint.
    pub const DEFAULT_TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Creates a new Google configuration with the given credentials.
    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            calendar_id: "primary".to_string(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("holdfast/{}", env!("CARGO_PKG_VERSION")),
            api_base_url: Self::DEFAULT_API_BASE_URL.to_string(),
            token_url: Self::DEFAULT_TOKEN_URL.to_string(),
            token_path: None,
            hold_summary: "Hold".to_string(),
        }
    }

    /// Sets the calendar identifier.
    pub fn with_calendar_id(mut self, id: impl Into<String>) -> Self {
        self.calendar_id = id.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Points the adapter at another API host (used by tests).
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Points token refresh at another endpoint (used by tests).
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Persists refreshed tokens to the given file.
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    /// Sets the title of tentative hold events.
    pub fn with_hold_summary(mut self, summary: impl Into<String>) -> Self {
        self.hold_summary = summary.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.credentials
            .validate()
            .map_err(|e| format!("invalid credentials: {}", e))?;

        if self.calendar_id.is_empty() {
            return Err("calendar_id must not be empty".to_string());
        }

        for (name, value) in [("api_base_url", &self.api_base_url), ("token_url", &self.token_url)] {
            url::Url::parse(value).map_err(|e| format!("invalid {}: {}", name, e))?;
        }

        Ok(())
    }
}

//! Orchestrator configuration.
//!
//! All settings live in a single TOML file passed to `holdfastd --config`.
//! Every section is optional and falls back to its defaults; only
//! `owner_id` is required.
//!
//! ```toml
//! owner_id = "acme"
//! store_path = "/var/lib/holdfast/store.json"
//!
//! [availability]
//! cache_ttl_secs = 900
//! adapter_timeout_secs = 10
//!
//! [holds]
//! default_ttl_minutes = 30
//! sweep_interval_secs = 300
//!
//! [webhooks]
//! address = "https://booking.example.com/hooks/calendar"
//!
//! [google]
//! client_id = "env::GOOGLE_CLIENT_ID"
//! client_secret = "env::GOOGLE_CLIENT_SECRET"
//! ```
//!
//! Credential values support the `env::VAR_NAME` secret reference.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use holdfast_core::{TracingConfig, TracingOutputFormat};
use holdfast_providers::google::{GoogleConfig, OAuthCredentials};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::ConfigError;
use crate::secret;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Business owner whose calendars and exclusion rules are orchestrated.
    pub owner_id: String,

    /// JSON store file.
    pub store_path: PathBuf,

    /// Availability aggregation settings.
    pub availability: AvailabilitySettings,

    /// Hold lifecycle settings.
    pub holds: HoldSettings,

    /// Push-notification settings.
    pub webhooks: WebhookSettings,

    /// Google Calendar OAuth client.
    pub google: Option<GoogleSettings>,

    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Availability aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilitySettings {
    /// TTL of aggregated results.
    pub cache_ttl_secs: u64,
    /// Bound on each adapter call of a fan-out.
    pub adapter_timeout_secs: u64,
    /// Default spacing between candidate slot starts.
    pub slot_interval_minutes: i64,
    /// Maximum number of calendars orchestrated at once.
    pub max_accounts: usize,
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 900,
            adapter_timeout_secs: 10,
            slot_interval_minutes: 60,
            max_accounts: 7,
        }
    }
}

/// Hold lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldSettings {
    /// TTL used when a caller does not pass one.
    pub default_ttl_minutes: i64,
    /// Expiry sweeper cadence.
    pub sweep_interval_secs: u64,
}

impl Default for HoldSettings {
    fn default() -> Self {
        Self {
            default_ttl_minutes: 30,
            sweep_interval_secs: 300,
        }
    }
}

/// Push-notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Public URL providers deliver notifications to. No subscriptions are
    /// opened when unset.
    pub address: Option<String>,
    /// Subscription renewal cadence.
    pub renewal_interval_secs: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            address: None,
            renewal_interval_secs: 86_400,
        }
    }
}

/// Google Calendar OAuth client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `env::` references).
    pub client_id: Option<String>,
    /// OAuth client secret (supports `env::` references).
    pub client_secret: Option<String>,
    /// Calendar used when an account does not name one.
    pub calendar_id: String,
    /// Request timeout.
    pub timeout_secs: u64,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            calendar_id: "primary".to_string(),
            timeout_secs: GoogleConfig::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl GoogleSettings {
    /// Resolves the OAuth client, following secret references.
    pub fn resolve_credentials(&self) -> Result<OAuthCredentials, ConfigError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| ConfigError::invalid("google.client_id is required"))
            .and_then(secret::resolve)?;
        let client_secret = self
            .client_secret
            .as_deref()
            .ok_or_else(|| ConfigError::invalid("google.client_secret is required"))
            .and_then(secret::resolve)?;
        Ok(OAuthCredentials::new(client_id, client_secret))
    }

    /// Builds the adapter configuration template.
    pub fn to_adapter_config(&self) -> Result<GoogleConfig, ConfigError> {
        let config = GoogleConfig::new(self.resolve_credentials()?)
            .with_calendar_id(&self.calendar_id)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `json`, `pretty` or `compact`.
    pub format: String,
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            level: "info".to_string(),
        }
    }
}

impl LoggingSettings {
    /// Builds the tracing configuration.
    pub fn to_tracing_config(&self) -> Result<TracingConfig, ConfigError> {
        let format = TracingOutputFormat::from_str(&self.format)
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        let level = Level::from_str(&self.level)
            .map_err(|_| ConfigError::invalid(format!("unknown log level `{}`", self.level)))?;
        Ok(TracingConfig::daemon().with_format(format).with_level(level))
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults for the given owner.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            store_path: PathBuf::from("holdfast-store.json"),
            ..Self::default()
        }
    }

    /// Loads and validates configuration from a file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder: set the store file.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Builder: set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.availability.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Builder: set the per-adapter timeout.
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.availability.adapter_timeout_secs = timeout.as_secs();
        self
    }

    /// Builder: set the default slot interval.
    pub fn with_slot_interval(mut self, minutes: i64) -> Self {
        self.availability.slot_interval_minutes = minutes;
        self
    }

    /// Builder: set the account cap.
    pub fn with_max_accounts(mut self, max: usize) -> Self {
        self.availability.max_accounts = max;
        self
    }

    /// Builder: set the default hold TTL.
    pub fn with_default_hold_ttl(mut self, minutes: i64) -> Self {
        self.holds.default_ttl_minutes = minutes;
        self
    }

    /// Builder: set the sweeper cadence.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.holds.sweep_interval_secs = interval.as_secs();
        self
    }

    /// Builder: set the webhook address.
    pub fn with_webhook_address(mut self, address: impl Into<String>) -> Self {
        self.webhooks.address = Some(address.into());
        self
    }

    /// Builder: set the webhook renewal cadence.
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.webhooks.renewal_interval_secs = interval.as_secs();
        self
    }

    /// Builder: set the Google OAuth client.
    pub fn with_google(mut self, google: GoogleSettings) -> Self {
        self.google = Some(google);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner_id.trim().is_empty() {
            return Err(ConfigError::invalid("owner_id is required"));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("store_path is required"));
        }
        if self.availability.adapter_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "availability.adapter_timeout_secs must be positive",
            ));
        }
        if self.availability.slot_interval_minutes <= 0 {
            return Err(ConfigError::invalid(
                "availability.slot_interval_minutes must be positive",
            ));
        }
        if self.availability.max_accounts == 0 {
            return Err(ConfigError::invalid("availability.max_accounts must be positive"));
        }
        if self.holds.default_ttl_minutes < 0 {
            return Err(ConfigError::invalid("holds.default_ttl_minutes must not be negative"));
        }
        if self.holds.sweep_interval_secs == 0 || self.webhooks.renewal_interval_secs == 0 {
            return Err(ConfigError::invalid("scheduler intervals must be positive"));
        }
        if let Some(address) = &self.webhooks.address
            && !(address.starts_with("https://") || address.starts_with("http://"))
        {
            return Err(ConfigError::invalid(format!(
                "webhooks.address must be an http(s) URL, got `{}`",
                address
            )));
        }
        self.logging.to_tracing_config()?;
        Ok(())
    }

    /// Returns the cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.availability.cache_ttl_secs)
    }

    /// Returns the per-adapter timeout.
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.availability.adapter_timeout_secs)
    }

    /// Returns the sweeper cadence.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.holds.sweep_interval_secs)
    }

    /// Returns the webhook renewal cadence.
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.webhooks.renewal_interval_secs)
    }
}

//! Adapter registry.
//!
//! The registry is the arena every fan-out resolves adapters through. It is
//! built explicitly from the owner's active accounts and injected into the
//! aggregator and the coordinator, so several orchestrators can coexist in
//! one process.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use holdfast_core::{AccountId, CalendarAccount, CredentialBundle, ProviderKind};
use holdfast_providers::google::{GoogleAdapter, GoogleConfig};
use holdfast_providers::{
    AdapterError, AdapterResult, BoxFuture, CalendarAdapter, MemoryAdapter, WebhookSubscription,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{AdapterFailure, ConfigError};

/// Default cap on orchestrated calendars.
pub const DEFAULT_MAX_ACCOUNTS: usize = 7;

/// Builds an adapter for a connected account.
pub trait AdapterFactory: Send + Sync {
    /// Creates the adapter. The adapter is not initialized yet.
    fn create(&self, account: &CalendarAccount) -> AdapterResult<Arc<dyn CalendarAdapter>>;
}

/// Factory for the built-in provider kinds.
#[derive(Debug, Clone, Default)]
pub struct ProviderFactory {
    google: Option<GoogleConfig>,
}

impl ProviderFactory {
    /// Creates a factory that can only build in-memory adapters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: enable Google accounts with the given configuration template.
    pub fn with_google(mut self, config: GoogleConfig) -> Self {
        self.google = Some(config);
        self
    }

    /// Creates a factory from the orchestrator configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, ConfigError> {
        let mut factory = Self::new();
        if let Some(google) = &config.google {
            factory = factory.with_google(google.to_adapter_config()?);
        }
        Ok(factory)
    }
}

impl AdapterFactory for ProviderFactory {
    fn create(&self, account: &CalendarAccount) -> AdapterResult<Arc<dyn CalendarAdapter>> {
        match account.kind {
            ProviderKind::Google => {
                let Some(template) = &self.google else {
                    return Err(AdapterError::configuration(
                        "no Google OAuth client configured",
                    )
                    .with_adapter(account.id.as_str()));
                };
                let mut config = template.clone();
                if let Some(calendar_id) = &account.calendar_id {
                    config = config.with_calendar_id(calendar_id);
                }
                Ok(Arc::new(GoogleAdapter::new(account.id.clone(), config)?))
            }
            ProviderKind::Memory => Ok(Arc::new(MemoryAdapter::new(account.id.clone()))),
        }
    }
}

/// Runs one adapter call bounded by `timeout`.
///
/// Both an adapter error and an elapsed timeout become an [`AdapterFailure`].
pub async fn bounded<T>(
    timeout: Duration,
    adapter_id: &AccountId,
    call: BoxFuture<'_, AdapterResult<T>>,
) -> Result<T, AdapterFailure> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AdapterFailure::from_error(adapter_id.clone(), &e)),
        Err(_) => Err(AdapterFailure::timed_out(adapter_id.clone())),
    }
}

struct Entry {
    adapter: Arc<dyn CalendarAdapter>,
    priority: i32,
    credentials: Option<CredentialBundle>,
}

/// Ordered set of active adapters.
///
/// Adapters are kept highest priority first; ties keep registration order.
pub struct AdapterRegistry {
    max_accounts: usize,
    entries: Vec<Entry>,
    subscriptions: RwLock<HashMap<AccountId, WebhookSubscription>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACCOUNTS)
    }
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new(max_accounts: usize) -> Self {
        Self {
            max_accounts,
            entries: Vec::new(),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a registry from accounts through `factory`.
    ///
    /// Inactive accounts are ignored. Accounts the factory rejects and
    /// accounts beyond the cap are skipped with a warning.
    pub fn from_accounts(
        accounts: impl IntoIterator<Item = CalendarAccount>,
        factory: &dyn AdapterFactory,
        max_accounts: usize,
    ) -> Self {
        let mut accounts: Vec<_> = accounts.into_iter().filter(|a| a.active).collect();
        accounts.sort_by_key(|a| Reverse(a.priority));

        let mut registry = Self::new(max_accounts);
        for account in accounts {
            match factory.create(&account) {
                Ok(adapter) => {
                    registry.register_account(&account, adapter);
                }
                Err(e) => {
                    warn!(adapter = %account.id, error = %e, "Failed to build adapter");
                }
            }
        }
        registry
    }

    /// Registers an adapter that still needs the account's credentials.
    ///
    /// Returns false if the adapter was rejected.
    pub fn register_account(
        &mut self,
        account: &CalendarAccount,
        adapter: Arc<dyn CalendarAdapter>,
    ) -> bool {
        self.insert(Entry {
            adapter,
            priority: account.priority,
            credentials: Some(account.credentials.clone()),
        })
    }

    /// Registers an adapter that is already initialized.
    ///
    /// Returns false if the adapter was rejected.
    pub fn register(&mut self, adapter: Arc<dyn CalendarAdapter>, priority: i32) -> bool {
        self.insert(Entry {
            adapter,
            priority,
            credentials: None,
        })
    }

    fn insert(&mut self, entry: Entry) -> bool {
        let id = entry.adapter.id().clone();
        if self.entries.iter().any(|e| e.adapter.id() == &id) {
            warn!(adapter = %id, "Adapter already registered");
            return false;
        }

        self.entries.push(entry);
        self.entries.sort_by_key(|e| Reverse(e.priority));

        if self.entries.len() > self.max_accounts
            && let Some(dropped) = self.entries.pop()
        {
            warn!(
                adapter = %dropped.adapter.id(),
                max_accounts = self.max_accounts,
                "Account limit reached, skipping adapter"
            );
            return dropped.adapter.id() != &id;
        }

        debug!(adapter = %id, "Registered adapter");
        true
    }

    /// Initializes every adapter registered with credentials.
    ///
    /// Adapters that fail are removed from the active set; their failures
    /// are returned.
    pub async fn initialize_all(&mut self) -> Vec<AdapterFailure> {
        let results = join_all(self.entries.iter().map(|entry| async move {
            match &entry.credentials {
                Some(credentials) => entry.adapter.initialize(credentials.clone()).await,
                None => Ok(()),
            }
        }))
        .await;

        let mut failures = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for (entry, result) in self.entries.drain(..).zip(results) {
            match result {
                Ok(()) => {
                    info!(adapter = %entry.adapter.id(), kind = entry.adapter.kind().as_str(), "Adapter ready");
                    kept.push(entry);
                }
                Err(e) => {
                    warn!(adapter = %entry.adapter.id(), error = %e, "Adapter failed to initialize, excluded");
                    failures.push(AdapterFailure::from_error(entry.adapter.id().clone(), &e));
                }
            }
        }
        self.entries = kept;
        failures
    }

    /// Returns the adapters, highest priority first.
    pub fn adapters(&self) -> Vec<Arc<dyn CalendarAdapter>> {
        self.entries.iter().map(|e| e.adapter.clone()).collect()
    }

    /// Looks up an adapter by id.
    pub fn get(&self, id: &AccountId) -> Option<Arc<dyn CalendarAdapter>> {
        self.entries
            .iter()
            .find(|e| e.adapter.id() == id)
            .map(|e| e.adapter.clone())
    }

    /// Returns the adapter ids, highest priority first.
    pub fn ids(&self) -> Vec<AccountId> {
        self.entries.iter().map(|e| e.adapter.id().clone()).collect()
    }

    /// Returns the number of adapters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no adapter is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records the live webhook subscription of an adapter.
    pub async fn record_subscription(&self, subscription: WebhookSubscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.adapter_id.clone(), subscription);
    }

    /// Returns every live subscription.
    pub async fn subscriptions(&self) -> Vec<WebhookSubscription> {
        let mut subs: Vec<_> = self.subscriptions.read().await.values().cloned().collect();
        subs.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id));
        subs
    }

    /// Returns the subscription of one adapter.
    pub async fn subscription(&self, id: &AccountId) -> Option<WebhookSubscription> {
        self.subscriptions.read().await.get(id).cloned()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("max_accounts", &self.max_accounts)
            .field("adapters", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn account(id: &str, priority: i32) -> CalendarAccount {
        CalendarAccount::new(
            id,
            "owner",
            ProviderKind::Memory,
            CredentialBundle::new("token", Some("refresh".into()), None),
        )
        .with_priority(priority)
    }

    fn names(registry: &AdapterRegistry) -> Vec<String> {
        registry.ids().iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn orders_by_priority_then_registration() {
        let accounts = vec![account("low", 1), account("high", 10), account("mid", 5), account("mid2", 5)];
        let registry = AdapterRegistry::from_accounts(accounts, &ProviderFactory::new(), 7);
        assert_eq!(names(&registry), ["high", "mid", "mid2", "low"]);
    }

    #[test]
    fn caps_at_max_accounts() {
        let accounts: Vec<_> = (0..9).map(|i| account(&format!("cal{}", i), i)).collect();
        let registry = AdapterRegistry::from_accounts(accounts, &ProviderFactory::new(), 7);

        assert_eq!(registry.len(), 7);
        assert!(registry.get(&AccountId::new("cal8")).is_some());
        assert!(registry.get(&AccountId::new("cal1")).is_none());
        assert!(registry.get(&AccountId::new("cal0")).is_none());
    }

    #[test]
    fn register_beyond_cap_rejects_lowest() {
        let mut registry = AdapterRegistry::new(1);
        assert!(registry.register(Arc::new(MemoryAdapter::authenticated("a")), 1));
        assert!(!registry.register(Arc::new(MemoryAdapter::authenticated("b")), 0));
        assert!(registry.register(Arc::new(MemoryAdapter::authenticated("c")), 5));
        assert_eq!(names(&registry), ["c"]);
    }

    #[test]
    fn skips_inactive_and_duplicates() {
        let mut inactive = account("gone", 3);
        inactive.deactivate();
        let registry = AdapterRegistry::from_accounts(
            vec![account("a", 0), inactive, account("a", 0)],
            &ProviderFactory::new(),
            7,
        );
        assert_eq!(names(&registry), ["a"]);
    }

    #[test]
    fn google_without_client_is_skipped() {
        let mut google = account("g", 0);
        google.kind = ProviderKind::Google;
        let registry = AdapterRegistry::from_accounts(vec![google], &ProviderFactory::new(), 7);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn initialize_all_excludes_failed_adapters() {
        let mut stale = account("stale", 0);
        stale.credentials = CredentialBundle::new("token", None, Some(Utc::now() - Duration::hours(1)));
        let mut registry = AdapterRegistry::from_accounts(
            vec![account("ok", 1), stale],
            &ProviderFactory::new(),
            7,
        );

        let failures = registry.initialize_all().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].adapter_id, AccountId::new("stale"));
        assert_eq!(names(&registry), ["ok"]);
        assert!(registry.get(&AccountId::new("ok")).unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn tracks_subscriptions() {
        let registry = AdapterRegistry::default();
        let sub = WebhookSubscription {
            adapter_id: AccountId::new("a"),
            channel_id: "ch-1".into(),
            resource_id: "res-1".into(),
            address: "https://example.com/hook".into(),
            expires_at: None,
        };
        registry.record_subscription(sub.clone()).await;
        assert_eq!(registry.subscriptions().await, vec![sub]);

        let renewed = WebhookSubscription {
            channel_id: "ch-2".into(),
            ..registry.subscription(&AccountId::new("a")).await.unwrap()
        };
        registry.record_subscription(renewed).await;
        assert_eq!(registry.subscriptions().await.len(), 1);
        assert_eq!(registry.subscriptions().await[0].channel_id, "ch-2");
    }
}

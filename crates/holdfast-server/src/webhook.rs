//! Provider push notifications.
//!
//! A notification only says that something on a calendar changed. The
//! handler never fetches the change; it drops every cached availability
//! answer so the next query goes back to the providers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use holdfast_core::AccountId;
use holdfast_providers::ResourceState;
use tracing::{debug, info, warn};

use crate::aggregator::DEFAULT_ADAPTER_TIMEOUT;
use crate::cache::SharedCache;
use crate::registry::{AdapterRegistry, bounded};

/// Reacts to push notifications and manages notification channels.
pub struct WebhookHandler {
    registry: Arc<AdapterRegistry>,
    cache: SharedCache,
    adapter_timeout: Duration,
}

impl WebhookHandler {
    /// Creates a handler.
    pub fn new(registry: Arc<AdapterRegistry>, cache: SharedCache) -> Self {
        Self {
            registry,
            cache,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }

    /// Builder: set the per-adapter timeout.
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Handles one notification. Returns true if the cache was cleared.
    ///
    /// `sync` is the channel handshake and changes nothing. Notifications
    /// for accounts this process does not know still clear the cache: a
    /// missed invalidation costs a stale answer, a spurious one costs a
    /// provider round trip.
    pub async fn handle_notification(&self, account_id: &AccountId, state: ResourceState) -> bool {
        if !state.is_change() {
            debug!(adapter = %account_id, "Webhook channel handshake");
            return false;
        }
        if self.registry.get(account_id).is_none() {
            warn!(adapter = %account_id, "Webhook for unknown account");
        }
        self.cache.write().await.clear();
        info!(adapter = %account_id, state = ?state, "Calendar changed, availability cache cleared");
        true
    }

    /// Handles a notification with a raw resource-state header value.
    ///
    /// A missing or unrecognized value is treated as a change.
    pub async fn handle_raw(&self, account_id: &str, resource_state: Option<&str>) -> bool {
        let state = match resource_state.and_then(ResourceState::parse) {
            Some(state) => state,
            None => {
                debug!(adapter = account_id, value = ?resource_state, "Unrecognized resource state");
                ResourceState::Exists
            }
        };
        self.handle_notification(&AccountId::new(account_id), state).await
    }

    /// Opens a notification channel on every adapter.
    ///
    /// Failures are logged and skipped. Returns the number of channels
    /// opened.
    pub async fn subscribe_all(&self, address: &str) -> usize {
        let timeout = self.adapter_timeout;
        let calls = self.registry.adapters().into_iter().map(|adapter| async move {
            let id = adapter.id().clone();
            bounded(timeout, &id, adapter.subscribe_to_webhook(address)).await
        });

        let mut opened = 0;
        for result in join_all(calls).await {
            match result {
                Ok(subscription) => {
                    debug!(
                        adapter = %subscription.adapter_id,
                        channel = %subscription.channel_id,
                        "Webhook channel opened"
                    );
                    self.registry.record_subscription(subscription).await;
                    opened += 1;
                }
                Err(failure) => warn!(
                    adapter = %failure.adapter_id,
                    reason = %failure.reason,
                    "Failed to open webhook channel"
                ),
            }
        }
        info!(opened, adapters = self.registry.len(), "Webhook channels opened");
        opened
    }

    /// Replaces every recorded channel with a fresh one.
    ///
    /// Returns the number of channels renewed.
    pub async fn renew_all(&self) -> usize {
        let timeout = self.adapter_timeout;
        let subscriptions = self.registry.subscriptions().await;
        let calls = subscriptions.iter().map(|subscription| async move {
            let id = &subscription.adapter_id;
            match self.registry.get(id) {
                Some(adapter) => Some(
                    bounded(timeout, id, adapter.renew_webhook_subscription(subscription)).await,
                ),
                None => None,
            }
        });

        let mut renewed = 0;
        for result in join_all(calls).await.into_iter().flatten() {
            match result {
                Ok(subscription) => {
                    self.registry.record_subscription(subscription).await;
                    renewed += 1;
                }
                Err(failure) => warn!(
                    adapter = %failure.adapter_id,
                    reason = %failure.reason,
                    "Failed to renew webhook channel"
                ),
            }
        }
        info!(renewed, total = subscriptions.len(), "Webhook channels renewed");
        renewed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use holdfast_core::{TimeSlot, TimeWindow};
    use holdfast_providers::{AvailabilityQuery, MemoryAdapter};

    use crate::cache::new_shared_cache;

    struct Fixture {
        adapters: Vec<Arc<MemoryAdapter>>,
        registry: Arc<AdapterRegistry>,
        cache: SharedCache,
        handler: WebhookHandler,
    }

    fn fixture(names: &[&str]) -> Fixture {
        let adapters: Vec<_> = names
            .iter()
            .map(|n| Arc::new(MemoryAdapter::authenticated(*n)))
            .collect();
        let mut registry = AdapterRegistry::default();
        for adapter in &adapters {
            registry.register(adapter.clone(), 0);
        }
        let registry = Arc::new(registry);
        let cache = new_shared_cache(Duration::from_secs(900));
        let handler = WebhookHandler::new(registry.clone(), cache.clone());
        Fixture {
            adapters,
            registry,
            cache,
            handler,
        }
    }

    async fn seed(cache: &SharedCache) {
        let start = Utc.with_ymd_and_hms(2030, 3, 4, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2030, 3, 4, 17, 0, 0).unwrap();
        cache.write().await.insert(
            AvailabilityQuery::new(TimeWindow::new(start, end), 60),
            vec![TimeSlot::available(start, end)],
        );
    }

    #[tokio::test]
    async fn change_clears_cache() {
        let f = fixture(&["work"]);
        seed(&f.cache).await;

        assert!(
            f.handler
                .handle_notification(&AccountId::new("work"), ResourceState::Exists)
                .await
        );
        assert!(f.cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn sync_is_a_no_op() {
        let f = fixture(&["work"]);
        seed(&f.cache).await;

        assert!(
            !f.handler
                .handle_notification(&AccountId::new("work"), ResourceState::Sync)
                .await
        );
        assert_eq!(f.cache.read().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_account_still_clears() {
        let f = fixture(&["work"]);
        seed(&f.cache).await;

        assert!(
            f.handler
                .handle_notification(&AccountId::new("stranger"), ResourceState::NotExists)
                .await
        );
        assert!(f.cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn raw_header_values() {
        let f = fixture(&["work"]);

        seed(&f.cache).await;
        assert!(!f.handler.handle_raw("work", Some("sync")).await);

        assert!(f.handler.handle_raw("work", Some("garbage")).await);
        assert!(f.cache.read().await.is_empty());

        seed(&f.cache).await;
        assert!(f.handler.handle_raw("work", None).await);
        assert!(f.cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn subscribe_and_renew() {
        let f = fixture(&["home", "work"]);

        assert_eq!(f.handler.subscribe_all("https://hooks.example.com/cal").await, 2);
        let first = f.registry.subscriptions().await;
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|s| s.address == "https://hooks.example.com/cal"));

        assert_eq!(f.handler.renew_all().await, 2);
        let renewed = f.registry.subscriptions().await;
        assert_eq!(renewed.len(), 2);
        for (old, new) in first.iter().zip(&renewed) {
            assert_eq!(old.adapter_id, new.adapter_id);
            assert_ne!(old.channel_id, new.channel_id);
        }
        assert!(f.adapters.iter().all(|a| a.subscriptions().len() == 1));
    }

    #[tokio::test]
    async fn subscribe_failures_are_skipped() {
        let f = fixture(&["home", "work"]);
        f.adapters[0].revoke_consent();

        assert_eq!(f.handler.subscribe_all("https://hooks.example.com/cal").await, 1);
        let subscriptions = f.registry.subscriptions().await;
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].adapter_id.as_str(), "work");
    }
}

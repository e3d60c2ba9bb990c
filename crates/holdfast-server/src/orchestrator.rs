//! The orchestrator facade.
//!
//! [`Orchestrator`] wires one adapter registry, one availability cache and
//! one store into the aggregator, the hold coordinator and the webhook
//! handler, and exposes the operations booking workflows call.

use std::sync::Arc;
use std::time::Duration;

use holdfast_core::{AccountId, CalendarEvent, EventDetails, TimeSlot, TimeWindow, WorkingHoursHint};
use holdfast_providers::{DEFAULT_HOLD_TTL_MINUTES, DEFAULT_SLOT_INTERVAL_MINUTES, ResourceState};

use crate::aggregator::{AvailabilityAggregator, AvailabilityResult, DEFAULT_ADAPTER_TIMEOUT, SlotRequest};
use crate::cache::{DEFAULT_CACHE_TTL, SharedCache, new_shared_cache};
use crate::config::OrchestratorConfig;
use crate::coordinator::HoldCoordinator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::hold::{AggregateHold, HoldId};
use crate::registry::AdapterRegistry;
use crate::store::{ExclusionStore, HoldStore};
use crate::webhook::WebhookHandler;

/// Runtime options of an orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Owner whose exclusion rules apply.
    pub owner_id: String,
    /// TTL of cached availability.
    pub cache_ttl: Duration,
    /// Bound on each adapter call.
    pub adapter_timeout: Duration,
    /// Slot interval used when a query does not pass one.
    pub slot_interval_minutes: i64,
    /// Hold TTL used when a caller does not pass one.
    pub default_hold_ttl_minutes: i64,
}

impl OrchestratorOptions {
    /// Creates options with defaults for the given owner.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
            slot_interval_minutes: DEFAULT_SLOT_INTERVAL_MINUTES,
            default_hold_ttl_minutes: DEFAULT_HOLD_TTL_MINUTES,
        }
    }

    /// Builder: set the per-adapter timeout.
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Builder: set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

impl From<&OrchestratorConfig> for OrchestratorOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            owner_id: config.owner_id.clone(),
            cache_ttl: config.cache_ttl(),
            adapter_timeout: config.adapter_timeout(),
            slot_interval_minutes: config.availability.slot_interval_minutes,
            default_hold_ttl_minutes: config.holds.default_ttl_minutes,
        }
    }
}

/// Multi-calendar availability and provisional hold orchestrator.
pub struct Orchestrator {
    options: OrchestratorOptions,
    registry: Arc<AdapterRegistry>,
    cache: SharedCache,
    aggregator: AvailabilityAggregator,
    coordinator: HoldCoordinator,
    webhooks: WebhookHandler,
}

impl Orchestrator {
    /// Creates an orchestrator over an initialized registry and a store.
    pub fn new<S>(options: OrchestratorOptions, registry: AdapterRegistry, store: Arc<S>) -> Self
    where
        S: HoldStore + ExclusionStore + 'static,
    {
        let registry = Arc::new(registry);
        let cache = new_shared_cache(options.cache_ttl);
        let exclusions: Arc<dyn ExclusionStore> = store.clone();
        let holds: Arc<dyn HoldStore> = store;

        let aggregator = AvailabilityAggregator::new(
            options.owner_id.clone(),
            registry.clone(),
            exclusions,
            cache.clone(),
        )
        .with_adapter_timeout(options.adapter_timeout);
        let coordinator = HoldCoordinator::new(registry.clone(), holds, cache.clone())
            .with_adapter_timeout(options.adapter_timeout);
        let webhooks = WebhookHandler::new(registry.clone(), cache.clone())
            .with_adapter_timeout(options.adapter_timeout);

        Self {
            options,
            registry,
            cache,
            aggregator,
            coordinator,
            webhooks,
        }
    }

    /// Returns the adapter registry.
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Returns the shared availability cache.
    pub fn cache(&self) -> SharedCache {
        self.cache.clone()
    }

    /// Returns the slots free on every calendar and allowed by the owner's
    /// exclusion rules.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NoCalendarsConfigured`](crate::OrchestratorError::NoCalendarsConfigured)
    /// when no calendar is connected, which is distinct from an empty
    /// result.
    pub async fn get_available_slots(
        &self,
        window: TimeWindow,
        duration_minutes: i64,
        max_slots: usize,
        working_hours: Option<WorkingHoursHint>,
        slot_interval_minutes: Option<i64>,
    ) -> OrchestratorResult<AvailabilityResult> {
        let mut request = SlotRequest::new(window, duration_minutes)
            .with_max_slots(max_slots)
            .with_slot_interval(slot_interval_minutes.unwrap_or(self.options.slot_interval_minutes));
        if let Some(hint) = working_hours {
            request = request.with_working_hours(hint);
        }
        self.aggregator.get_available_slots(&request).await
    }

    /// Reserves `slot` on every calendar for the booking request.
    pub async fn create_provisional_holds(
        &self,
        request_id: &str,
        slot: &TimeSlot,
        ttl_minutes: Option<i64>,
    ) -> OrchestratorResult<AggregateHold> {
        let minutes = ttl_minutes.unwrap_or(self.options.default_hold_ttl_minutes);
        let ttl = chrono::Duration::try_minutes(minutes).ok_or_else(|| {
            OrchestratorError::invalid(format!("hold ttl of {} minutes is out of range", minutes))
        })?;
        self.coordinator.create(request_id, slot, ttl).await
    }

    /// Turns every tentative hold into a real event.
    pub async fn confirm_provisional_holds(
        &self,
        hold_id: &HoldId,
        details: &EventDetails,
    ) -> OrchestratorResult<Vec<CalendarEvent>> {
        self.coordinator.confirm(hold_id, details).await
    }

    /// Releases every tentative hold. Idempotent.
    pub async fn release_provisional_holds(&self, hold_id: &HoldId) -> OrchestratorResult<()> {
        self.coordinator.release(hold_id).await.map(|_| ())
    }

    /// Releases every hold past its expiry. Returns how many expired.
    pub async fn cleanup_expired_holds(&self) -> OrchestratorResult<usize> {
        self.coordinator.sweep().await
    }

    /// Handles a provider push notification.
    pub async fn handle_webhook_notification(&self, account_id: &AccountId, state: ResourceState) {
        self.webhooks.handle_notification(account_id, state).await;
    }

    /// Opens a notification channel on every calendar. Returns how many opened.
    pub async fn subscribe_webhooks(&self, address: &str) -> usize {
        self.webhooks.subscribe_all(address).await
    }

    /// Replaces every notification channel. Returns how many were renewed.
    pub async fn renew_webhook_subscriptions(&self) -> usize {
        self.webhooks.renew_all().await
    }
}

//! Hold coordination.
//!
//! The coordinator reserves one slot on every calendar as a single logical
//! transaction, then drives the resulting [`AggregateHold`] to a terminal
//! state.
//!
//! - **Create** fans out to every adapter. If any adapter fails, the holds
//!   that did succeed are released and nothing is persisted.
//! - **Confirm** fans out to every per-adapter hold. Failed adapters get one
//!   more attempt; if any still fails, confirmed events are deleted, the
//!   remaining holds are released and the hold ends `Released`.
//! - **Release** is idempotent.
//! - **Sweep** releases active holds past their expiry and marks them
//!   `Expired`.
//!
//! Operations on one hold are serialized by a per-hold lock, and every
//! terminal transition goes through the store's compare-and-set, so two
//! racing operations have exactly one winner.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use holdfast_core::{AccountId, CalendarEvent, EventDetails, TimeSlot};
use holdfast_providers::ProvisionalHold;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::aggregator::DEFAULT_ADAPTER_TIMEOUT;
use crate::cache::SharedCache;
use crate::error::{AdapterFailure, OrchestratorError, OrchestratorResult, RollbackReport, StoreError};
use crate::hold::{AggregateHold, HoldId, HoldState, HoldTransition};
use crate::registry::{AdapterRegistry, bounded};
use crate::store::HoldStore;

/// Longest hold a caller may request.
pub const MAX_HOLD_TTL_DAYS: i64 = 366;

type HoldLock = Arc<tokio::sync::Mutex<()>>;

/// Drives aggregate holds through their lifecycle.
pub struct HoldCoordinator {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn HoldStore>,
    cache: SharedCache,
    adapter_timeout: Duration,
    locks: Mutex<HashMap<HoldId, HoldLock>>,
}

impl HoldCoordinator {
    /// Creates a coordinator.
    pub fn new(registry: Arc<AdapterRegistry>, store: Arc<dyn HoldStore>, cache: SharedCache) -> Self {
        Self {
            registry,
            store,
            cache,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Builder: set the per-adapter timeout.
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Reserves `slot` on every calendar for `request_id`.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NoCalendarsConfigured`] with no adapters
    /// - [`OrchestratorError::InvalidRequest`] if `ttl` exceeds
    ///   [`MAX_HOLD_TTL_DAYS`]
    /// - [`OrchestratorError::HoldAlreadyActive`] if the request already
    ///   holds a slot
    /// - [`OrchestratorError::HoldCreationFailed`] (retryable) if any adapter
    ///   refused; every sibling hold has been released
    pub async fn create(
        &self,
        request_id: &str,
        slot: &TimeSlot,
        ttl: chrono::Duration,
    ) -> OrchestratorResult<AggregateHold> {
        if self.registry.is_empty() {
            return Err(OrchestratorError::NoCalendarsConfigured);
        }
        if ttl > chrono::Duration::days(MAX_HOLD_TTL_DAYS) {
            return Err(OrchestratorError::invalid(format!(
                "hold ttl must not exceed {} days",
                MAX_HOLD_TTL_DAYS
            )));
        }
        if self.store.active_hold_for_request(request_id).await?.is_some() {
            return Err(OrchestratorError::HoldAlreadyActive {
                request_id: request_id.to_string(),
            });
        }

        let ttl = ttl.max(chrono::Duration::zero());
        let slot = TimeSlot::available(slot.start, slot.end);
        let timeout = self.adapter_timeout;
        let calls = self.registry.adapters().into_iter().map(|adapter| {
            let slot = &slot;
            async move {
                let id = adapter.id().clone();
                bounded(
                    timeout,
                    &id,
                    adapter.create_provisional_hold(slot, request_id, ttl),
                )
                .await
            }
        });

        let mut created = Vec::new();
        let mut failures = Vec::new();
        for result in join_all(calls).await {
            match result {
                Ok(hold) => created.push(hold),
                Err(failure) => {
                    warn!(
                        adapter = %failure.adapter_id,
                        request_id,
                        reason = %failure.reason,
                        "Provisional hold failed"
                    );
                    failures.push(failure);
                }
            }
        }

        if !failures.is_empty() {
            let rollback = self.release_holds(created.iter()).await;
            return Err(OrchestratorError::HoldCreationFailed { failures, rollback });
        }

        let now = Utc::now();
        let hold = AggregateHold::active(request_id, &slot, created, now, now + ttl);
        if let Err(e) = self.store.insert_hold(hold.clone()).await {
            warn!(request_id, error = %e, "Failed to persist hold, rolling back");
            self.release_holds(hold.holds.values()).await;
            return Err(match e {
                StoreError::DuplicateRequest { request_id } => {
                    OrchestratorError::HoldAlreadyActive { request_id }
                }
                other => other.into(),
            });
        }

        self.invalidate_cache().await;
        info!(
            hold_id = %hold.id,
            request_id,
            adapters = hold.holds.len(),
            expires_at = %hold.expires_at,
            "Hold created"
        );
        Ok(hold)
    }

    /// Converts every per-adapter hold into a real event.
    ///
    /// Returns the resulting events keyed in adapter-id order.
    pub async fn confirm(
        &self,
        id: &HoldId,
        details: &EventDetails,
    ) -> OrchestratorResult<Vec<CalendarEvent>> {
        let _lock = self.lock(id).await;

        let hold = self.load_active(id).await?;
        if hold.is_expired_at(Utc::now()) {
            info!(hold_id = %id, "Hold expired before confirmation");
            self.release_holds(hold.holds.values()).await;
            self.finish(&hold, HoldTransition::to(HoldState::Expired)).await?;
            return Err(OrchestratorError::HoldExpired(id.clone()));
        }

        let all: Vec<&ProvisionalHold> = hold.holds.values().collect();
        let (mut confirmed, failed) = self.confirm_holds(&all, details).await;

        let mut failures = Vec::new();
        if !failed.is_empty() {
            debug!(hold_id = %id, failed = failed.len(), "Retrying failed confirmations");
            let retry: Vec<&ProvisionalHold> = failed.iter().map(|(h, _)| *h).collect();
            let (again, still_failed) = self.confirm_holds(&retry, details).await;
            confirmed.extend(again);
            failures = still_failed;
        }

        if !failures.is_empty() {
            error!(
                hold_id = %id,
                confirmed = confirmed.len(),
                failed = failures.len(),
                "Partial confirmation, compensating"
            );
            self.compensate_confirm(&confirmed, failures.iter().map(|(h, _)| *h))
                .await;
            self.finish(&hold, HoldTransition::to(HoldState::Released)).await?;
            return Err(OrchestratorError::ConfirmFailed {
                id: id.clone(),
                failures: failures.into_iter().map(|(_, f)| f).collect(),
            });
        }

        let event_ids = confirmed
            .iter()
            .map(|(adapter, event)| (adapter.clone(), event.id.clone()))
            .collect();
        self.finish(
            &hold,
            HoldTransition::to(HoldState::Confirmed).with_event_ids(event_ids),
        )
        .await?;
        info!(hold_id = %id, events = confirmed.len(), "Hold confirmed");
        Ok(confirmed.into_values().collect())
    }

    /// Releases every per-adapter hold.
    ///
    /// Releasing a hold that is already released or expired is a no-op.
    /// A hold released after its expiry ends `Expired`. Returns the
    /// terminal state.
    pub async fn release(&self, id: &HoldId) -> OrchestratorResult<HoldState> {
        let _lock = self.lock(id).await;

        let hold = self
            .store
            .get_hold(id)
            .await?
            .ok_or_else(|| OrchestratorError::HoldNotFound(id.clone()))?;
        match hold.state {
            HoldState::Released | HoldState::Expired => {
                debug!(hold_id = %id, state = %hold.state, "Hold already released");
                return Ok(hold.state);
            }
            HoldState::Active => {}
            state => {
                return Err(OrchestratorError::HoldNotActive {
                    id: id.clone(),
                    state,
                });
            }
        }

        let terminal = if hold.is_expired_at(Utc::now()) {
            HoldState::Expired
        } else {
            HoldState::Released
        };
        self.release_holds(hold.holds.values()).await;
        self.finish(&hold, HoldTransition::to(terminal)).await?;
        info!(hold_id = %id, state = %terminal, "Hold released");
        Ok(terminal)
    }

    /// Releases every active hold whose expiry has passed and marks it
    /// `Expired`. Returns the number of holds expired.
    pub async fn sweep(&self) -> OrchestratorResult<usize> {
        let now = Utc::now();
        let candidates = self.store.expired_active_holds(now).await?;
        if candidates.is_empty() {
            debug!("No expired holds");
            return Ok(0);
        }

        let mut expired = 0;
        for candidate in candidates {
            let _lock = self.lock(&candidate.id).await;

            let Some(hold) = self.store.get_hold(&candidate.id).await? else {
                continue;
            };
            if !hold.is_sweepable_at(now) {
                continue;
            }

            let report = self.release_holds(hold.holds.values()).await;
            match self.finish(&hold, HoldTransition::to(HoldState::Expired)).await {
                Ok(()) => {
                    expired += 1;
                    info!(
                        hold_id = %hold.id,
                        request_id = %hold.request_id,
                        released = report.attempted.len(),
                        "Hold expired"
                    );
                }
                Err(e) => warn!(hold_id = %hold.id, error = %e, "Failed to mark hold expired"),
            }
        }
        Ok(expired)
    }

    async fn load_active(&self, id: &HoldId) -> OrchestratorResult<AggregateHold> {
        let hold = self
            .store
            .get_hold(id)
            .await?
            .ok_or_else(|| OrchestratorError::HoldNotFound(id.clone()))?;
        if hold.state != HoldState::Active {
            return Err(OrchestratorError::HoldNotActive {
                id: id.clone(),
                state: hold.state,
            });
        }
        Ok(hold)
    }

    async fn confirm_holds<'h>(
        &self,
        holds: &[&'h ProvisionalHold],
        details: &EventDetails,
    ) -> (
        BTreeMap<AccountId, CalendarEvent>,
        Vec<(&'h ProvisionalHold, AdapterFailure)>,
    ) {
        let timeout = self.adapter_timeout;
        let calls = holds.iter().map(|&hold| async move {
            let adapter_id = &hold.id.adapter_id;
            let result = match self.registry.get(adapter_id) {
                Some(adapter) => {
                    bounded(
                        timeout,
                        adapter_id,
                        adapter.confirm_provisional_hold(&hold.id, details),
                    )
                    .await
                }
                None => Err(AdapterFailure::unregistered(adapter_id.clone())),
            };
            (hold, result)
        });

        let mut confirmed = BTreeMap::new();
        let mut failed = Vec::new();
        for (hold, result) in join_all(calls).await {
            match result {
                Ok(event) => {
                    confirmed.insert(hold.id.adapter_id.clone(), event);
                }
                Err(failure) => {
                    warn!(
                        adapter = %failure.adapter_id,
                        event_id = %hold.id.event_id,
                        reason = %failure.reason,
                        "Confirmation failed"
                    );
                    failed.push((hold, failure));
                }
            }
        }
        (confirmed, failed)
    }

    async fn compensate_confirm<'h>(
        &self,
        confirmed: &BTreeMap<AccountId, CalendarEvent>,
        unconfirmed: impl Iterator<Item = &'h ProvisionalHold>,
    ) {
        let timeout = self.adapter_timeout;
        let deletions = confirmed.iter().map(|(adapter_id, event)| async move {
            let result = match self.registry.get(adapter_id) {
                Some(adapter) => bounded(timeout, adapter_id, adapter.delete_event(&event.id)).await,
                None => Err(AdapterFailure::unregistered(adapter_id.clone())),
            };
            if let Err(failure) = result {
                error!(
                    adapter = %adapter_id,
                    event_id = %event.id,
                    reason = %failure.reason,
                    "Failed to delete confirmed event during compensation"
                );
            }
        });
        join_all(deletions).await;

        let report = self.release_holds(unconfirmed).await;
        if !report.is_clean() {
            error!(failed = report.failed.len(), "Compensation left tentative holds behind");
        }
    }

    /// Releases per-adapter holds concurrently. Never fails; the report
    /// lists what was attempted and what did not succeed.
    async fn release_holds<'h>(
        &self,
        holds: impl Iterator<Item = &'h ProvisionalHold>,
    ) -> RollbackReport {
        let timeout = self.adapter_timeout;
        let holds: Vec<&ProvisionalHold> = holds.collect();
        let calls = holds.iter().map(|&hold| async move {
            let adapter_id = &hold.id.adapter_id;
            match self.registry.get(adapter_id) {
                Some(adapter) => {
                    bounded(timeout, adapter_id, adapter.release_provisional_hold(&hold.id)).await
                }
                None => Err(AdapterFailure::unregistered(adapter_id.clone())),
            }
        });

        let mut report = RollbackReport::default();
        for (hold, result) in holds.iter().zip(join_all(calls).await) {
            report.attempted.push(hold.id.clone());
            if let Err(failure) = result {
                warn!(
                    adapter = %failure.adapter_id,
                    event_id = %hold.id.event_id,
                    reason = %failure.reason,
                    "Failed to release provisional hold"
                );
                report.failed.push(failure);
            }
        }
        report
    }

    async fn finish(&self, hold: &AggregateHold, transition: HoldTransition) -> OrchestratorResult<()> {
        let result = self.store.transition(&hold.id, HoldState::Active, transition).await;
        self.invalidate_cache().await;
        match result {
            Ok(_) => Ok(()),
            Err(StoreError::StateConflict { id, actual, .. }) => {
                Err(OrchestratorError::HoldNotActive { id, state: actual })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn invalidate_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn lock(&self, id: &HoldId) -> HoldLockGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone();
        HoldLockGuard {
            locks: &self.locks,
            id: id.clone(),
            held: Some(lock.lock_owned().await),
        }
    }
}

/// Exclusive access to one hold.
///
/// The lock entry is dropped from the map with the last guard, so the map
/// only tracks holds with an operation in flight.
struct HoldLockGuard<'a> {
    locks: &'a Mutex<HashMap<HoldId, HoldLock>>,
    id: HoldId,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for HoldLockGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        self.held.take();
        if locks.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.id);
        }
    }
}

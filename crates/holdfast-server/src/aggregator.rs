//! Availability aggregation.
//!
//! A query is fanned out to every registered adapter concurrently, each
//! call bounded by the per-adapter timeout. The per-adapter slot lists are
//! intersected pairwise, then the owner's blackout periods and working
//! hours are applied. Clean results are cached.
//!
//! # Degradation
//!
//! - A failed or timed-out adapter contributes no slots, so the intersection
//!   is empty. The failure is reported in [`AvailabilityResult`] and the
//!   result is not cached.
//! - If the exclusion rules cannot be read, the slots are returned
//!   unfiltered (fail open).

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use holdfast_core::{TimeSlot, TimeWindow, WorkingHoursHint, apply_blackouts, apply_working_hours};
use holdfast_providers::{AvailabilityQuery, DEFAULT_SLOT_INTERVAL_MINUTES};
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::error::{AdapterFailure, OrchestratorError, OrchestratorResult};
use crate::registry::{AdapterRegistry, bounded};
use crate::store::ExclusionStore;

/// Reference bound on one adapter call.
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters of an aggregated availability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRequest {
    /// Window to search.
    pub window: TimeWindow,
    /// Length of each slot.
    pub duration_minutes: i64,
    /// Maximum number of slots returned.
    pub max_slots: usize,
    /// Optional daily bounds for candidate generation.
    pub working_hours: Option<WorkingHoursHint>,
    /// Spacing between candidate starts.
    pub slot_interval_minutes: i64,
}

impl SlotRequest {
    /// Creates a request with the default interval and no slot limit.
    pub fn new(window: TimeWindow, duration_minutes: i64) -> Self {
        Self {
            window,
            duration_minutes,
            max_slots: usize::MAX,
            working_hours: None,
            slot_interval_minutes: DEFAULT_SLOT_INTERVAL_MINUTES,
        }
    }

    /// Checks that the duration and interval are positive and representable.
    pub fn validate(&self) -> OrchestratorResult<()> {
        check_minutes("duration_minutes", self.duration_minutes)?;
        check_minutes("slot_interval_minutes", self.slot_interval_minutes)?;
        Ok(())
    }

    /// Builder: cap the number of returned slots.
    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    /// Builder: set the working-hours hint passed to adapters.
    pub fn with_working_hours(mut self, hint: WorkingHoursHint) -> Self {
        self.working_hours = Some(hint);
        self
    }

    /// Builder: set the slot interval.
    pub fn with_slot_interval(mut self, minutes: i64) -> Self {
        self.slot_interval_minutes = minutes;
        self
    }

    /// Returns the adapter query, which is also the cache key.
    pub fn query(&self) -> AvailabilityQuery {
        let mut query = AvailabilityQuery::new(self.window, self.duration_minutes)
            .with_slot_interval(self.slot_interval_minutes);
        if let Some(hint) = self.working_hours {
            query = query.with_working_hours(hint);
        }
        query
    }
}

/// Outcome of an availability request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityResult {
    /// Available slots, sorted by start.
    pub slots: Vec<TimeSlot>,
    /// Adapters that failed or timed out; empty for a clean result.
    pub failed_adapters: Vec<AdapterFailure>,
    /// True when served from the cache.
    pub from_cache: bool,
}

impl AvailabilityResult {
    /// Returns true if every adapter answered.
    pub fn is_complete(&self) -> bool {
        self.failed_adapters.is_empty()
    }
}

/// Fans availability queries out to every adapter and merges the answers.
pub struct AvailabilityAggregator {
    owner_id: String,
    registry: Arc<AdapterRegistry>,
    exclusions: Arc<dyn ExclusionStore>,
    cache: SharedCache,
    adapter_timeout: Duration,
}

impl AvailabilityAggregator {
    /// Creates an aggregator.
    pub fn new(
        owner_id: impl Into<String>,
        registry: Arc<AdapterRegistry>,
        exclusions: Arc<dyn ExclusionStore>,
        cache: SharedCache,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            registry,
            exclusions,
            cache,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }

    /// Builder: set the per-adapter timeout.
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Returns available slots across every calendar.
    ///
    /// # Errors
    ///
    /// Fails with [`OrchestratorError::NoCalendarsConfigured`] when no
    /// adapter is registered.
    pub async fn get_available_slots(
        &self,
        request: &SlotRequest,
    ) -> OrchestratorResult<AvailabilityResult> {
        request.validate()?;
        if self.registry.is_empty() {
            return Err(OrchestratorError::NoCalendarsConfigured);
        }

        let query = request.query();
        let generation = {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get_valid(&query) {
                debug!(slots = entry.slots.len(), "Serving availability from cache");
                return Ok(AvailabilityResult {
                    slots: truncate(entry.slots.clone(), request.max_slots),
                    failed_adapters: Vec::new(),
                    from_cache: true,
                });
            }
            cache.generation()
        };

        let (lists, failed_adapters) = self.fan_out(&query).await;
        let slots = intersect_all(&lists, query.duration());
        let slots = self.apply_exclusions(slots, &query.window).await;

        if failed_adapters.is_empty() {
            self.cache
                .write()
                .await
                .insert_if_current(generation, query, slots.clone());
        } else {
            info!(
                failed = failed_adapters.len(),
                "Availability computed with failed adapters, not caching"
            );
        }

        Ok(AvailabilityResult {
            slots: truncate(slots, request.max_slots),
            failed_adapters,
            from_cache: false,
        })
    }

    async fn fan_out(&self, query: &AvailabilityQuery) -> (Vec<Vec<TimeSlot>>, Vec<AdapterFailure>) {
        let timeout = self.adapter_timeout;
        let calls = self.registry.adapters().into_iter().map(|adapter| async move {
            let id = adapter.id().clone();
            let result = bounded(timeout, &id, adapter.get_availability(query)).await;
            (id, result)
        });

        let mut lists = Vec::new();
        let mut failures = Vec::new();
        for (id, result) in join_all(calls).await {
            match result {
                Ok(slots) => {
                    debug!(adapter = %id, slots = slots.len(), "Adapter availability");
                    lists.push(slots);
                }
                Err(failure) => {
                    warn!(
                        adapter = %id,
                        timed_out = failure.timed_out,
                        reason = %failure.reason,
                        "Adapter availability failed, contributing no slots"
                    );
                    failures.push(failure);
                    lists.push(Vec::new());
                }
            }
        }
        (lists, failures)
    }

    async fn apply_exclusions(&self, slots: Vec<TimeSlot>, window: &TimeWindow) -> Vec<TimeSlot> {
        if slots.is_empty() {
            return slots;
        }

        let slots = match self.exclusions.blackouts(&self.owner_id, window).await {
            Ok(blackouts) => apply_blackouts(slots, &blackouts),
            Err(e) => {
                warn!(owner = %self.owner_id, error = %e, "Blackout periods unavailable, failing open");
                return slots;
            }
        };

        match self.exclusions.working_hours(&self.owner_id).await {
            Ok(rows) => {
                if rows.is_empty() {
                    warn!(owner = %self.owner_id, "No working hours configured, every slot is excluded");
                }
                apply_working_hours(slots, &rows)
            }
            Err(e) => {
                warn!(owner = %self.owner_id, error = %e, "Working hours unavailable, failing open");
                slots
            }
        }
    }
}

fn check_minutes(name: &str, minutes: i64) -> OrchestratorResult<()> {
    match chrono::Duration::try_minutes(minutes) {
        Some(_) if minutes > 0 => Ok(()),
        _ => Err(OrchestratorError::invalid(format!(
            "{} must be a positive number of minutes, got {}",
            name, minutes
        ))),
    }
}

fn truncate(mut slots: Vec<TimeSlot>, max: usize) -> Vec<TimeSlot> {
    slots.truncate(max);
    slots
}

/// Intersects two slot lists.
///
/// Wherever an available slot of `a` overlaps an available slot of `b`, the
/// overlapping sub-interval is kept. Unavailable slots never contribute.
pub fn intersect_pair(a: &[TimeSlot], b: &[TimeSlot]) -> Vec<TimeSlot> {
    a.iter()
        .flat_map(|x| b.iter().filter_map(move |y| x.intersect(y)))
        .collect()
}

/// Reduces per-adapter slot lists to the slots free on every adapter.
///
/// Sub-intervals shorter than `min_duration` are dropped; the result is
/// sorted and free of duplicates. With no lists the result is empty; with
/// one list it is that list's available slots.
pub fn intersect_all(lists: &[Vec<TimeSlot>], min_duration: chrono::Duration) -> Vec<TimeSlot> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };

    let seed: Vec<TimeSlot> = first.iter().copied().filter(|s| s.available).collect();
    let mut slots = rest
        .iter()
        .fold(seed, |acc, next| intersect_pair(&acc, next));

    slots.retain(|s| s.duration() >= min_duration);
    slots.sort_by_key(|s| (s.start, s.end));
    slots.dedup();
    slots
}

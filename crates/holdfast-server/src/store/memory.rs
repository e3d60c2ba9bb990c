//! In-memory store.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use holdfast_core::{AccountId, BlackoutPeriod, CalendarAccount, TimeWindow, WorkingHours};
use holdfast_providers::BoxFuture;
use tokio::sync::RwLock;

use super::{AccountStore, ExclusionStore, HoldStore, StoreData};
use crate::error::{StoreError, StoreResult};
use crate::hold::{AggregateHold, HoldId, HoldState, HoldTransition};

/// A store that lives in process memory.
///
/// Outage switches let tests exercise the fail-open exclusion policy and
/// the rollback taken when a hold cannot be persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
    exclusions_down: AtomicBool,
    holds_down: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `data`.
    pub fn with_data(data: StoreData) -> Self {
        Self {
            data: RwLock::new(data),
            ..Self::default()
        }
    }

    /// Builder method to add an account.
    pub fn with_account(mut self, account: CalendarAccount) -> Self {
        self.data.get_mut().upsert_account(account);
        self
    }

    /// Builder method to add a blackout period.
    pub fn with_blackout(mut self, blackout: BlackoutPeriod) -> Self {
        self.data.get_mut().blackouts.push(blackout);
        self
    }

    /// Builder method to add a working-hours row.
    pub fn with_working_hours(mut self, row: WorkingHours) -> Self {
        self.data.get_mut().working_hours.push(row);
        self
    }

    /// Makes exclusion queries fail while `down` is true.
    pub fn set_exclusions_unavailable(&self, down: bool) {
        self.exclusions_down.store(down, Ordering::SeqCst);
    }

    /// Makes hold inserts fail while `down` is true.
    pub fn set_holds_unavailable(&self, down: bool) {
        self.holds_down.store(down, Ordering::SeqCst);
    }

    /// Returns a copy of every hold.
    pub async fn holds(&self) -> Vec<AggregateHold> {
        self.data.read().await.holds.clone()
    }

    fn check(&self, flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl AccountStore for MemoryStore {
    fn active_accounts<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<CalendarAccount>>> {
        Box::pin(async move { Ok(self.data.read().await.active_accounts(owner_id)) })
    }

    fn upsert_account(&self, account: CalendarAccount) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.data.write().await.upsert_account(account);
            Ok(())
        })
    }

    fn deactivate_account<'a>(&'a self, id: &'a AccountId) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.data.write().await.deactivate_account(id)) })
    }
}

impl HoldStore for MemoryStore {
    fn insert_hold(&self, hold: AggregateHold) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.check(&self.holds_down)?;
            self.data.write().await.insert_hold(hold)
        })
    }

    fn get_hold<'a>(&'a self, id: &'a HoldId) -> BoxFuture<'a, StoreResult<Option<AggregateHold>>> {
        Box::pin(async move { Ok(self.data.read().await.get_hold(id)) })
    }

    fn active_hold_for_request<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<AggregateHold>>> {
        Box::pin(async move { Ok(self.data.read().await.active_hold_for_request(request_id)) })
    }

    fn transition<'a>(
        &'a self,
        id: &'a HoldId,
        expected: HoldState,
        transition: HoldTransition,
    ) -> BoxFuture<'a, StoreResult<AggregateHold>> {
        Box::pin(async move { self.data.write().await.transition(id, expected, transition) })
    }

    fn expired_active_holds(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<AggregateHold>>> {
        Box::pin(async move { Ok(self.data.read().await.expired_active_holds(now)) })
    }
}

impl ExclusionStore for MemoryStore {
    fn blackouts<'a>(
        &'a self,
        owner_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, StoreResult<Vec<BlackoutPeriod>>> {
        Box::pin(async move {
            self.check(&self.exclusions_down)?;
            Ok(self.data.read().await.blackouts(owner_id, window))
        })
    }

    fn working_hours<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<WorkingHours>>> {
        Box::pin(async move {
            self.check(&self.exclusions_down)?;
            Ok(self.data.read().await.working_hours(owner_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use holdfast_core::TimeSlot;

    #[tokio::test]
    async fn blackouts_are_scoped_to_owner_and_window() {
        let day = |h| Utc.with_ymd_and_hms(2025, 3, 3, h, 0, 0).unwrap();
        let store = MemoryStore::new()
            .with_blackout(BlackoutPeriod::new("b1", "owner", day(12), day(13)))
            .with_blackout(BlackoutPeriod::new("b2", "other", day(12), day(13)))
            .with_blackout(BlackoutPeriod::new("b3", "owner", day(20), day(21)));

        let window = TimeWindow::new(day(9), day(17));
        let found = store.blackouts("owner", &window).await.unwrap();
        let ids: Vec<_> = found.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["b1"]);
    }

    #[tokio::test]
    async fn outage_switches() {
        let store = MemoryStore::new();
        store.set_exclusions_unavailable(true);
        assert!(matches!(
            store.working_hours("owner").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_exclusions_unavailable(false);
        assert!(store.working_hours("owner").await.unwrap().is_empty());

        store.set_holds_unavailable(true);
        let start = Utc::now();
        let slot = TimeSlot::available(start, start + Duration::hours(1));
        let hold = AggregateHold::active("req", &slot, [], start, start);
        assert!(store.insert_hold(hold).await.is_err());
        assert!(store.holds().await.is_empty());
    }
}

//! Persistent stores consumed by the orchestrator.
//!
//! Three narrow traits describe what the orchestrator needs from storage:
//!
//! - [`AccountStore`] - connected calendar accounts
//! - [`HoldStore`] - aggregate holds, with a compare-and-set transition
//! - [`ExclusionStore`] - blackout periods and working hours
//!
//! [`MemoryStore`] and [`FileStore`] implement all three on top of the same
//! [`StoreData`] snapshot.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use holdfast_core::{AccountId, BlackoutPeriod, CalendarAccount, TimeWindow, WorkingHours};
use holdfast_providers::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::hold::{AggregateHold, HoldId, HoldState, HoldTransition};

/// Read/write access to connected calendar accounts.
pub trait AccountStore: Send + Sync {
    /// Returns the active accounts of an owner.
    fn active_accounts<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<CalendarAccount>>>;

    /// Inserts or replaces an account.
    fn upsert_account(&self, account: CalendarAccount) -> BoxFuture<'_, StoreResult<()>>;

    /// Soft-deletes an account. Returns false if it does not exist.
    fn deactivate_account<'a>(&'a self, id: &'a AccountId) -> BoxFuture<'a, StoreResult<bool>>;
}

/// Durable aggregate-hold records.
pub trait HoldStore: Send + Sync {
    /// Persists a new hold.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::DuplicateRequest`] if an active hold already
    /// exists for the same request id.
    fn insert_hold(&self, hold: AggregateHold) -> BoxFuture<'_, StoreResult<()>>;

    /// Looks up a hold by id.
    fn get_hold<'a>(&'a self, id: &'a HoldId) -> BoxFuture<'a, StoreResult<Option<AggregateHold>>>;

    /// Returns the active hold of a booking request, if any.
    fn active_hold_for_request<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<AggregateHold>>>;

    /// Applies `transition` only if the persisted state equals `expected`.
    ///
    /// Exactly one of several racing callers observes success.
    fn transition<'a>(
        &'a self,
        id: &'a HoldId,
        expected: HoldState,
        transition: HoldTransition,
    ) -> BoxFuture<'a, StoreResult<AggregateHold>>;

    /// Returns active holds whose expiry is at or before `now`.
    fn expired_active_holds(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<AggregateHold>>>;
}

/// Business-defined exclusion rules.
pub trait ExclusionStore: Send + Sync {
    /// Returns the owner's blackout periods overlapping `window`.
    fn blackouts<'a>(
        &'a self,
        owner_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, StoreResult<Vec<BlackoutPeriod>>>;

    /// Returns the owner's working-hours rows.
    fn working_hours<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<WorkingHours>>>;
}

/// Snapshot of everything a store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    /// Connected accounts.
    pub accounts: Vec<CalendarAccount>,
    /// Aggregate holds in every state.
    pub holds: Vec<AggregateHold>,
    /// Blackout periods.
    pub blackouts: Vec<BlackoutPeriod>,
    /// Working-hours rows.
    pub working_hours: Vec<WorkingHours>,
}

impl StoreData {
    fn active_accounts(&self, owner_id: &str) -> Vec<CalendarAccount> {
        self.accounts
            .iter()
            .filter(|a| a.active && a.owner_id == owner_id)
            .cloned()
            .collect()
    }

    fn upsert_account(&mut self, account: CalendarAccount) {
        match self.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }
    }

    fn deactivate_account(&mut self, id: &AccountId) -> bool {
        match self.accounts.iter_mut().find(|a| &a.id == id) {
            Some(account) => {
                account.deactivate();
                true
            }
            None => false,
        }
    }

    fn insert_hold(&mut self, hold: AggregateHold) -> StoreResult<()> {
        if self.holds.iter().any(|h| h.id == hold.id) {
            return Err(StoreError::DuplicateHold(hold.id));
        }
        if hold.state == HoldState::Active && self.active_hold_for_request(&hold.request_id).is_some()
        {
            return Err(StoreError::DuplicateRequest {
                request_id: hold.request_id,
            });
        }
        self.holds.push(hold);
        Ok(())
    }

    fn get_hold(&self, id: &HoldId) -> Option<AggregateHold> {
        self.holds.iter().find(|h| &h.id == id).cloned()
    }

    fn active_hold_for_request(&self, request_id: &str) -> Option<AggregateHold> {
        self.holds
            .iter()
            .find(|h| h.state == HoldState::Active && h.request_id == request_id)
            .cloned()
    }

    fn transition(
        &mut self,
        id: &HoldId,
        expected: HoldState,
        transition: HoldTransition,
    ) -> StoreResult<AggregateHold> {
        let hold = self
            .holds
            .iter_mut()
            .find(|h| &h.id == id)
            .ok_or_else(|| StoreError::HoldNotFound(id.clone()))?;
        if hold.state != expected {
            return Err(StoreError::StateConflict {
                id: id.clone(),
                expected,
                actual: hold.state,
            });
        }
        transition.apply(hold);
        Ok(hold.clone())
    }

    fn expired_active_holds(&self, now: DateTime<Utc>) -> Vec<AggregateHold> {
        self.holds
            .iter()
            .filter(|h| h.is_sweepable_at(now))
            .cloned()
            .collect()
    }

    fn blackouts(&self, owner_id: &str, window: &TimeWindow) -> Vec<BlackoutPeriod> {
        self.blackouts
            .iter()
            .filter(|b| b.owner_id == owner_id && window.overlaps(b.start, b.end))
            .cloned()
            .collect()
    }

    fn working_hours(&self, owner_id: &str) -> Vec<WorkingHours> {
        self.working_hours
            .iter()
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use holdfast_core::{CredentialBundle, ProviderKind, TimeSlot};

    fn slot() -> TimeSlot {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        TimeSlot::available(start, start + Duration::hours(1))
    }

    fn hold(request_id: &str) -> AggregateHold {
        let now = Utc::now();
        AggregateHold::active(request_id, &slot(), [], now, now + Duration::minutes(30))
    }

    #[test]
    fn second_active_hold_for_request_is_rejected() {
        let mut data = StoreData::default();
        data.insert_hold(hold("req-1")).unwrap();

        let err = data.insert_hold(hold("req-1")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRequest { .. }));
        data.insert_hold(hold("req-2")).unwrap();
    }

    #[test]
    fn request_can_be_held_again_after_release() {
        let mut data = StoreData::default();
        let first = hold("req-1");
        let id = first.id.clone();
        data.insert_hold(first).unwrap();
        data.transition(&id, HoldState::Active, HoldTransition::to(HoldState::Released))
            .unwrap();

        data.insert_hold(hold("req-1")).unwrap();
        assert!(data.active_hold_for_request("req-1").is_some());
    }

    #[test]
    fn transition_is_compare_and_set() {
        let mut data = StoreData::default();
        let h = hold("req-1");
        let id = h.id.clone();
        data.insert_hold(h).unwrap();

        let confirmed = data
            .transition(&id, HoldState::Active, HoldTransition::to(HoldState::Confirmed))
            .unwrap();
        assert_eq!(confirmed.state, HoldState::Confirmed);

        let err = data
            .transition(&id, HoldState::Active, HoldTransition::to(HoldState::Released))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StateConflict {
                actual: HoldState::Confirmed,
                ..
            }
        ));

        let missing = data
            .transition(
                &HoldId::new("nope"),
                HoldState::Active,
                HoldTransition::to(HoldState::Released),
            )
            .unwrap_err();
        assert!(matches!(missing, StoreError::HoldNotFound(_)));
    }

    #[test]
    fn expired_active_holds_excludes_terminal_and_future() {
        let mut data = StoreData::default();
        let now = Utc::now();
        let mut past = hold("past");
        past.expires_at = now - Duration::minutes(1);
        let mut released = hold("released");
        released.expires_at = now - Duration::minutes(1);
        released.state = HoldState::Released;
        data.insert_hold(past.clone()).unwrap();
        data.insert_hold(released).unwrap();
        data.insert_hold(hold("future")).unwrap();

        let expired = data.expired_active_holds(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, past.id);
    }

    #[test]
    fn accounts_filter_by_owner_and_active() {
        let mut data = StoreData::default();
        let creds = CredentialBundle::new("t", None, None);
        data.upsert_account(CalendarAccount::new("a", "owner", ProviderKind::Memory, creds.clone()));
        data.upsert_account(CalendarAccount::new("b", "owner", ProviderKind::Memory, creds.clone()));
        data.upsert_account(CalendarAccount::new("c", "other", ProviderKind::Memory, creds));

        assert!(data.deactivate_account(&AccountId::new("b")));
        assert!(!data.deactivate_account(&AccountId::new("zzz")));

        let ids: Vec<_> = data
            .active_accounts("owner")
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![AccountId::new("a")]);
        assert_eq!(data.accounts.len(), 3);
    }
}

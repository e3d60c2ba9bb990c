//! Aggregate hold records.
//!
//! An [`AggregateHold`] is the cross-calendar unit callers operate on: one
//! [`ProvisionalHold`] per adapter, all covering the same slot, moving
//! through a single state machine:
//!
//! ```text
//! PENDING ──► ACTIVE ──┬──► CONFIRMED
//!                      ├──► RELEASED
//!                      └──► EXPIRED
//! ```
//!
//! `Pending` only exists while the creation fan-out runs and is never
//! persisted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use holdfast_core::{AccountId, TimeSlot};
use holdfast_providers::ProvisionalHold;
use serde::{Deserialize, Serialize};

/// Identifier of an aggregate hold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldId(String);

impl HoldId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HoldId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle state of an aggregate hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    /// Creation fan-out in progress.
    Pending,
    /// Every adapter holds the slot.
    Active,
    /// Converted into real events.
    Confirmed,
    /// Explicitly released.
    Released,
    /// Released by the sweeper after its expiry passed.
    Expired,
}

impl HoldState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Confirmed => "confirmed",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }

    /// Returns true for states no operation can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Released | Self::Expired)
    }
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation of one slot across every active calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateHold {
    /// Hold identifier.
    pub id: HoldId,
    /// Originating booking-request identifier.
    pub request_id: String,
    /// Start of the held slot.
    pub start: DateTime<Utc>,
    /// End of the held slot.
    pub end: DateTime<Utc>,
    /// Per-adapter holds keyed by adapter id.
    pub holds: BTreeMap<AccountId, ProvisionalHold>,
    /// When the hold was created.
    pub created_at: DateTime<Utc>,
    /// When the hold becomes eligible for the sweeper.
    pub expires_at: DateTime<Utc>,
    /// Current state.
    pub state: HoldState,
    /// Events produced by confirmation, keyed by adapter id.
    #[serde(default)]
    pub event_ids: BTreeMap<AccountId, String>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl AggregateHold {
    /// Builds an active hold from the per-adapter holds of a finished fan-out.
    pub fn active(
        request_id: impl Into<String>,
        slot: &TimeSlot,
        holds: impl IntoIterator<Item = ProvisionalHold>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HoldId::generate(),
            request_id: request_id.into(),
            start: slot.start,
            end: slot.end,
            holds: holds
                .into_iter()
                .map(|h| (h.id.adapter_id.clone(), h))
                .collect(),
            created_at,
            expires_at,
            state: HoldState::Active,
            event_ids: BTreeMap::new(),
            updated_at: created_at,
        }
    }

    /// Returns the held slot.
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::available(self.start, self.end)
    }

    /// Returns true if the expiry has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Returns true if the hold is active and past its expiry.
    pub fn is_sweepable_at(&self, now: DateTime<Utc>) -> bool {
        self.state == HoldState::Active && self.is_expired_at(now)
    }
}

/// A state change applied through a store compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldTransition {
    /// Target state.
    pub to: HoldState,
    /// Confirmed event ids to record.
    pub event_ids: BTreeMap<AccountId, String>,
    /// Timestamp of the change.
    pub at: DateTime<Utc>,
}

impl HoldTransition {
    /// Creates a transition to `state` stamped now.
    pub fn to(state: HoldState) -> Self {
        Self {
            to: state,
            event_ids: BTreeMap::new(),
            at: Utc::now(),
        }
    }

    /// Builder method to record confirmed event ids.
    pub fn with_event_ids(mut self, event_ids: BTreeMap<AccountId, String>) -> Self {
        self.event_ids = event_ids;
        self
    }

    /// Applies the transition to a hold.
    pub fn apply(self, hold: &mut AggregateHold) {
        hold.state = self.to;
        hold.updated_at = self.at;
        if !self.event_ids.is_empty() {
            hold.event_ids = self.event_ids;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use holdfast_providers::ProvisionalHoldId;

    fn slot() -> TimeSlot {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        TimeSlot::available(start, start + Duration::hours(1))
    }

    fn provisional(adapter: &str, slot: &TimeSlot) -> ProvisionalHold {
        ProvisionalHold::new(
            ProvisionalHoldId::new(AccountId::new(adapter), format!("{}-evt", adapter)),
            slot,
            "req-1",
            slot.start,
        )
    }

    #[test]
    fn active_hold_keys_by_adapter() {
        let slot = slot();
        let now = Utc::now();
        let hold = AggregateHold::active(
            "req-1",
            &slot,
            [provisional("b", &slot), provisional("a", &slot)],
            now,
            now + Duration::minutes(30),
        );

        assert_eq!(hold.state, HoldState::Active);
        let ids: Vec<_> = hold.holds.keys().map(AccountId::as_str).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(hold.holds.values().all(|h| h.covers(&slot)));
        assert!(!hold.is_sweepable_at(now));
        assert!(hold.is_sweepable_at(now + Duration::minutes(30)));
    }

    #[test]
    fn terminal_states() {
        assert!(!HoldState::Pending.is_terminal());
        assert!(!HoldState::Active.is_terminal());
        assert!(HoldState::Confirmed.is_terminal());
        assert!(HoldState::Released.is_terminal());
        assert!(HoldState::Expired.is_terminal());
    }

    #[test]
    fn transition_records_event_ids() {
        let slot = slot();
        let now = Utc::now();
        let mut hold = AggregateHold::active("req-1", &slot, [provisional("a", &slot)], now, now);

        let mut events = BTreeMap::new();
        events.insert(AccountId::new("a"), "evt-1".to_string());
        HoldTransition::to(HoldState::Confirmed)
            .with_event_ids(events)
            .apply(&mut hold);

        assert_eq!(hold.state, HoldState::Confirmed);
        assert_eq!(hold.event_ids[&AccountId::new("a")], "evt-1");
    }

    #[test]
    fn serializes_with_adapter_keys() {
        let slot = slot();
        let now = Utc::now();
        let hold = AggregateHold::active("req-1", &slot, [provisional("work", &slot)], now, now);

        let json = serde_json::to_value(&hold).unwrap();
        assert_eq!(json["state"], "active");
        assert!(json["holds"]["work"].is_object());

        let back: AggregateHold = serde_json::from_value(json).unwrap();
        assert_eq!(back, hold);
    }
}

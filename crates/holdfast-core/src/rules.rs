//! Business-defined exclusion rules.
//!
//! Blackout periods and working hours are declared per owner and consulted
//! read-only when filtering aggregated availability.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::time::TimeSlot;

/// A period during which the owner takes no bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    /// Rule identifier.
    pub id: String,
    /// Owning user identifier.
    pub owner_id: String,
    /// Start of the blackout (inclusive).
    pub start: DateTime<Utc>,
    /// End of the blackout (exclusive).
    pub end: DateTime<Utc>,
    /// Free-form reason.
    #[serde(default)]
    pub reason: Option<String>,
}

impl BlackoutPeriod {
    /// Creates a blackout period.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            start,
            end,
            reason: None,
        }
    }

    /// Half-open overlap test: `slot.start < end && slot.end > start`.
    pub fn blocks(&self, slot: &TimeSlot) -> bool {
        slot.start < self.end && slot.end > self.start
    }
}

/// Bookable hours for one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    /// Owning user identifier.
    pub owner_id: String,
    /// The weekday this row applies to.
    pub weekday: Weekday,
    /// Local start of the working day.
    pub start_time: NaiveTime,
    /// Local end of the working day.
    pub end_time: NaiveTime,
    /// Timezone the local times are expressed in.
    pub timezone: Tz,
}

impl WorkingHours {
    /// Creates a working-hours row.
    pub fn new(
        owner_id: impl Into<String>,
        weekday: Weekday,
        start_time: NaiveTime,
        end_time: NaiveTime,
        timezone: Tz,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            weekday,
            start_time,
            end_time,
            timezone,
        }
    }

    /// Returns true if the slot starts on this row's weekday and fits inside
    /// its local bounds without crossing midnight.
    pub fn admits(&self, slot: &TimeSlot) -> bool {
        let start = slot.start.with_timezone(&self.timezone);
        let end = slot.end.with_timezone(&self.timezone);
        start.weekday() == self.weekday
            && start.date_naive() == end.date_naive()
            && start.time() >= self.start_time
            && end.time() <= self.end_time
    }
}

/// Removes every slot overlapping any blackout period.
pub fn apply_blackouts(slots: Vec<TimeSlot>, blackouts: &[BlackoutPeriod]) -> Vec<TimeSlot> {
    if blackouts.is_empty() {
        return slots;
    }
    slots
        .into_iter()
        .filter(|slot| !blackouts.iter().any(|b| b.blocks(slot)))
        .collect()
}

/// Keeps only slots admitted by a working-hours row for their weekday.
///
/// A slot whose weekday has no row is removed, so an empty rule set removes
/// everything.
pub fn apply_working_hours(slots: Vec<TimeSlot>, rows: &[WorkingHours]) -> Vec<TimeSlot> {
    slots
        .into_iter()
        .filter(|slot| rows.iter().any(|row| row.admits(slot)))
        .collect()
}

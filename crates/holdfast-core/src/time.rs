//! Time types for availability queries.
//!
//! This module provides [`TimeWindow`] for defining query ranges,
//! [`TimeSlot`] for candidate meeting slots, and [`generate_slot_grid`]
//! which lays a fixed-interval grid of slots over a window and marks each
//! one against a list of busy intervals.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A time window for querying calendars.
///
/// Represents a half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "TimeWindow start must be <= end");
        Self { start, end }
    }

    /// Creates a time window, returning `None` if `start` is after `end`.
    pub fn checked(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Creates a time window from a start time and duration.
    pub fn from_duration(start: DateTime<Utc>, duration: Duration) -> Self {
        Self::new(start, start + duration)
    }

    /// Creates a time window for a single day in the given timezone.
    ///
    /// Returns `None` when local midnight does not exist or is ambiguous.
    pub fn for_date<Tz2: TimeZone>(date: NaiveDate, tz: &Tz2) -> Option<Self> {
        let start = tz
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()?
            .with_timezone(&Utc);
        let end = tz
            .from_local_datetime(&date.succ_opt()?.and_time(NaiveTime::MIN))
            .single()?
            .with_timezone(&Utc);
        Some(Self { start, end })
    }

    /// Returns the duration of this time window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    ///
    /// Uses half-open interval semantics: `[start, end)`.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }

    /// Checks if the interval `[start, end)` overlaps this window.
    ///
    /// Touching intervals (one ends exactly when the other starts) do not overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

/// A candidate meeting slot.
///
/// Slots are immutable values produced by adapters and by every
/// aggregation step; they are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Start of the slot (inclusive).
    pub start: DateTime<Utc>,
    /// End of the slot (exclusive).
    pub end: DateTime<Utc>,
    /// Whether the slot is free.
    pub available: bool,
}

impl TimeSlot {
    /// Creates an available slot.
    pub fn available(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            available: true,
        }
    }

    /// Creates an unavailable slot.
    pub fn busy(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            available: false,
        }
    }

    /// Returns the slot bounds as a window.
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: self.end,
        }
    }

    /// Returns the duration of the slot.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open overlap test against another interval.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }

    /// Returns the overlapping sub-interval of two available slots.
    ///
    /// Returns `None` if either slot is unavailable or they do not overlap.
    pub fn intersect(&self, other: &TimeSlot) -> Option<TimeSlot> {
        if !self.available || !other.available {
            return None;
        }
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| TimeSlot::available(start, end))
    }

    /// Returns true if both slots cover exactly the same interval.
    pub fn same_bounds(&self, other: &TimeSlot) -> bool {
        self.start == other.start && self.end == other.end
    }
}

/// Daily bounds used to restrict slot generation.
///
/// Unlike the per-weekday working-hours rules applied by the aggregator, the
/// hint is the same for every day and only prunes the candidate grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkingHoursHint {
    /// Earliest local start time.
    pub start: NaiveTime,
    /// Latest local end time.
    pub end: NaiveTime,
    /// Timezone in which `start`/`end` are interpreted.
    pub timezone: Tz,
}

impl WorkingHoursHint {
    /// Creates a new hint.
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: Tz) -> Self {
        Self {
            start,
            end,
            timezone,
        }
    }

    /// Returns true if the interval lies within the daily bounds.
    ///
    /// Intervals crossing local midnight never fit.
    pub fn admits(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let local_start = start.with_timezone(&self.timezone);
        let local_end = end.with_timezone(&self.timezone);
        local_start.date_naive() == local_end.date_naive()
            && local_start.time() >= self.start
            && local_end.time() <= self.end
    }
}

/// Lays a grid of candidate slots over `window`.
///
/// Candidates start at `window.start` and every `interval` after that, as
/// long as `start + duration <= window.end`. Each candidate is marked
/// unavailable if it overlaps any of the `busy` intervals. When a `hint` is
/// given, candidates outside it are skipped entirely.
///
/// Returns an empty list when `duration` or `interval` is not positive.
/// The walk stops at the end of the representable time range.
pub fn generate_slot_grid(
    window: &TimeWindow,
    duration: Duration,
    interval: Duration,
    hint: Option<&WorkingHoursHint>,
    busy: &[TimeWindow],
) -> Vec<TimeSlot> {
    if duration <= Duration::zero() || interval <= Duration::zero() {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut start = window.start;
    while let Some(end) = start.checked_add_signed(duration)
        && end <= window.end
    {
        if hint.is_none_or(|h| h.admits(start, end)) {
            let free = !busy.iter().any(|b| b.overlaps(start, end));
            slots.push(TimeSlot {
                start,
                end,
                available: free,
            });
        }
        match start.checked_add_signed(interval) {
            Some(next) => start = next,
            None => break,
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    mod time_window {
        use super::*;

        #[test]
        fn creation() {
            let start = utc(2025, 2, 5, 9, 0, 0);
            let end = utc(2025, 2, 5, 17, 0, 0);
            let window = TimeWindow::new(start, end);
            assert_eq!(window.start, start);
            assert_eq!(window.end, end);
            assert_eq!(window.duration(), Duration::hours(8));
        }

        #[test]
        #[should_panic(expected = "start must be <= end")]
        fn invalid_window() {
            let start = utc(2025, 2, 5, 17, 0, 0);
            let end = utc(2025, 2, 5, 9, 0, 0);
            TimeWindow::new(start, end);
        }

        #[test]
        fn checked_rejects_inverted() {
            assert!(TimeWindow::checked(utc(2025, 2, 5, 17, 0, 0), utc(2025, 2, 5, 9, 0, 0)).is_none());
            assert!(TimeWindow::checked(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 9, 0, 0)).is_some());
        }

        #[test]
        fn contains_datetime() {
            let window = TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0));

            assert!(window.contains(utc(2025, 2, 5, 10, 0, 0)));
            assert!(window.contains(utc(2025, 2, 5, 9, 0, 0))); // start inclusive
            assert!(!window.contains(utc(2025, 2, 5, 17, 0, 0))); // end exclusive
            assert!(!window.contains(utc(2025, 2, 5, 8, 59, 59)));
        }

        #[test]
        fn overlaps_half_open() {
            let window = TimeWindow::new(utc(2025, 2, 5, 12, 0, 0), utc(2025, 2, 5, 13, 0, 0));

            assert!(window.overlaps(utc(2025, 2, 5, 12, 0, 0), utc(2025, 2, 5, 13, 0, 0)));
            assert!(window.overlaps(utc(2025, 2, 5, 11, 30, 0), utc(2025, 2, 5, 12, 30, 0)));
            assert!(window.overlaps(utc(2025, 2, 5, 11, 0, 0), utc(2025, 2, 5, 14, 0, 0)));
            // Touching on either side
            assert!(!window.overlaps(utc(2025, 2, 5, 11, 0, 0), utc(2025, 2, 5, 12, 0, 0)));
            assert!(!window.overlaps(utc(2025, 2, 5, 13, 0, 0), utc(2025, 2, 5, 14, 0, 0)));
        }

        #[test]
        fn for_date() {
            let date = NaiveDate::from_ymd_opt(2025, 2, 5).unwrap();
            let window = TimeWindow::for_date(date, &Utc).unwrap();
            assert_eq!(window.start, utc(2025, 2, 5, 0, 0, 0));
            assert_eq!(window.end, utc(2025, 2, 6, 0, 0, 0));
        }

        #[test]
        fn serde_roundtrip() {
            let window = TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0));
            let json = serde_json::to_string(&window).unwrap();
            let parsed: TimeWindow = serde_json::from_str(&json).unwrap();
            assert_eq!(window, parsed);
        }
    }

    mod time_slot {
        use super::*;

        #[test]
        fn intersect_overlapping() {
            let a = TimeSlot::available(utc(2025, 3, 1, 9, 0, 0), utc(2025, 3, 1, 11, 0, 0));
            let b = TimeSlot::available(utc(2025, 3, 1, 10, 0, 0), utc(2025, 3, 1, 12, 0, 0));
            let i = a.intersect(&b).unwrap();
            assert_eq!(i.start, utc(2025, 3, 1, 10, 0, 0));
            assert_eq!(i.end, utc(2025, 3, 1, 11, 0, 0));
            assert!(i.available);
        }

        #[test]
        fn intersect_requires_both_available() {
            let a = TimeSlot::available(utc(2025, 3, 1, 9, 0, 0), utc(2025, 3, 1, 10, 0, 0));
            let b = TimeSlot::busy(utc(2025, 3, 1, 9, 0, 0), utc(2025, 3, 1, 10, 0, 0));
            assert!(a.intersect(&b).is_none());
            assert!(b.intersect(&a).is_none());
        }

        #[test]
        fn intersect_touching_is_empty() {
            let a = TimeSlot::available(utc(2025, 3, 1, 9, 0, 0), utc(2025, 3, 1, 10, 0, 0));
            let b = TimeSlot::available(utc(2025, 3, 1, 10, 0, 0), utc(2025, 3, 1, 11, 0, 0));
            assert!(a.intersect(&b).is_none());
        }
    }

    mod grid {
        use super::*;

        fn day() -> TimeWindow {
            TimeWindow::new(utc(2025, 3, 1, 9, 0, 0), utc(2025, 3, 1, 17, 0, 0))
        }

        #[test]
        fn hourly_grid_covers_window() {
            let slots = generate_slot_grid(&day(), Duration::hours(1), Duration::hours(1), None, &[]);
            assert_eq!(slots.len(), 8);
            assert_eq!(slots[0].start, utc(2025, 3, 1, 9, 0, 0));
            assert_eq!(slots[7].end, utc(2025, 3, 1, 17, 0, 0));
            assert!(slots.iter().all(|s| s.available));
        }

        #[test]
        fn busy_marks_overlapping_slots() {
            let busy = [TimeWindow::new(
                utc(2025, 3, 1, 10, 30, 0),
                utc(2025, 3, 1, 11, 15, 0),
            )];
            let slots = generate_slot_grid(&day(), Duration::hours(1), Duration::hours(1), None, &busy);
            let unavailable: Vec<_> = slots.iter().filter(|s| !s.available).map(|s| s.start).collect();
            assert_eq!(
                unavailable,
                vec![utc(2025, 3, 1, 10, 0, 0), utc(2025, 3, 1, 11, 0, 0)]
            );
        }

        #[test]
        fn grid_rendering() {
            let busy = [
                TimeWindow::new(utc(2025, 3, 1, 10, 30, 0), utc(2025, 3, 1, 11, 15, 0)),
                TimeWindow::new(utc(2025, 3, 1, 14, 0, 0), utc(2025, 3, 1, 15, 0, 0)),
            ];
            let rendered = generate_slot_grid(&day(), Duration::hours(1), Duration::hours(1), None, &busy)
                .iter()
                .map(|s| {
                    let state = if s.available { "free" } else { "busy" };
                    format!("{} {}", s.start.format("%H:%M"), state)
                })
                .collect::<Vec<_>>()
                .join("\n");
            insta::assert_snapshot!(rendered, @r"
            09:00 free
            10:00 busy
            11:00 busy
            12:00 free
            13:00 free
            14:00 busy
            15:00 free
            16:00 free
            ");
        }

        #[test]
        fn interval_shorter_than_duration_overlaps_candidates() {
            let slots = generate_slot_grid(
                &day(),
                Duration::minutes(90),
                Duration::minutes(30),
                None,
                &[],
            );
            // 09:00 .. 15:30 inclusive, every 30 minutes
            assert_eq!(slots.len(), 14);
            assert_eq!(slots.last().unwrap().end, utc(2025, 3, 1, 17, 0, 0));
        }

        #[test]
        fn hint_prunes_candidates() {
            let hint = WorkingHoursHint::new(hm(10, 0), hm(12, 0), chrono_tz::UTC);
            let slots = generate_slot_grid(
                &day(),
                Duration::hours(1),
                Duration::hours(1),
                Some(&hint),
                &[],
            );
            let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
            assert_eq!(starts, vec![utc(2025, 3, 1, 10, 0, 0), utc(2025, 3, 1, 11, 0, 0)]);
        }

        #[test]
        fn hint_uses_its_timezone() {
            // 09:00-10:00 in Zurich is 08:00-09:00 UTC in winter
            let hint = WorkingHoursHint::new(hm(9, 0), hm(10, 0), chrono_tz::Europe::Zurich);
            let window = TimeWindow::new(utc(2025, 3, 1, 6, 0, 0), utc(2025, 3, 1, 12, 0, 0));
            let slots =
                generate_slot_grid(&window, Duration::hours(1), Duration::hours(1), Some(&hint), &[]);
            assert_eq!(slots.len(), 1);
            assert_eq!(slots[0].start, utc(2025, 3, 1, 8, 0, 0));
        }

        #[test]
        fn non_positive_interval_yields_nothing() {
            assert!(generate_slot_grid(&day(), Duration::hours(1), Duration::zero(), None, &[]).is_empty());
            assert!(generate_slot_grid(&day(), Duration::zero(), Duration::hours(1), None, &[]).is_empty());
        }

        #[test]
        fn grid_stops_at_end_of_time() {
            let end = DateTime::<Utc>::MAX_UTC;
            let window = TimeWindow::new(end - Duration::hours(3), end);
            let slots = generate_slot_grid(&window, Duration::hours(1), Duration::hours(2), None, &[]);
            assert_eq!(slots.len(), 2);
            assert_eq!(slots[1].end, end);

            let huge = Duration::days(365 * 1_000_000);
            assert!(generate_slot_grid(&day(), huge, Duration::hours(1), None, &[]).is_empty());
            assert_eq!(generate_slot_grid(&window, Duration::hours(1), huge, None, &[]).len(), 1);
        }
    }
}

//! Core types: time windows, slots, events, accounts, exclusion rules

pub mod account;
pub mod event;
pub mod rules;
pub mod time;
pub mod tracing;

pub use account::{AccountId, CalendarAccount, CredentialBundle, ProviderKind};
pub use event::{Attendee, CalendarEvent, EventDetails, EventStatus, ResponseStatus};
pub use rules::{BlackoutPeriod, WorkingHours, apply_blackouts, apply_working_hours};
pub use time::{TimeSlot, TimeWindow, WorkingHoursHint, generate_slot_grid};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};

//! Event types for calendar events.
//!
//! This module provides the provider-agnostic event model used outside and
//! at the end of the hold workflow:
//! - [`CalendarEvent`]: an event as it exists on one calendar
//! - [`EventDetails`]: what a caller supplies to create or confirm an event
//! - [`Attendee`] and [`ResponseStatus`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::TimeWindow;

/// The response status for an event attendee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The attendee has accepted the invitation.
    Accepted,
    /// The attendee has declined the invitation.
    Declined,
    /// The attendee has tentatively accepted.
    Tentative,
    /// The attendee has not responded.
    #[default]
    NeedsAction,
}

impl ResponseStatus {
    /// Parses a provider response status string.
    pub fn from_api(value: Option<&str>) -> Self {
        match value {
            Some("accepted") => Self::Accepted,
            Some("declined") => Self::Declined,
            Some("tentative") => Self::Tentative,
            _ => Self::NeedsAction,
        }
    }
}

/// An event attendee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Email address.
    pub email: String,
    /// Display name, if known.
    pub display_name: Option<String>,
    /// Response status.
    #[serde(default)]
    pub response_status: ResponseStatus,
}

impl Attendee {
    /// Creates an attendee with the given email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            response_status: ResponseStatus::NeedsAction,
        }
    }

    /// Builder method to set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Lifecycle status of an event on its calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// A provisional hold, not visible to attendees.
    Tentative,
    /// A real event.
    Confirmed,
    /// A cancelled event.
    Cancelled,
}

impl EventStatus {
    /// Parses a provider status string; unknown values are treated as confirmed.
    pub fn from_api(value: Option<&str>) -> Self {
        match value {
            Some("tentative") => Self::Tentative,
            Some("cancelled") => Self::Cancelled,
            _ => Self::Confirmed,
        }
    }

    /// Returns the provider string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tentative => "tentative",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An event on one connected calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider event identifier.
    pub id: String,
    /// Identifier of the calendar account that owns the event.
    pub account_id: String,
    /// Provider calendar identifier (e.g. `"primary"`).
    pub calendar_id: String,
    /// Event title.
    pub summary: String,
    /// Event description.
    pub description: Option<String>,
    /// Event location.
    pub location: Option<String>,
    /// Start time.
    pub start: DateTime<Utc>,
    /// End time.
    pub end: DateTime<Utc>,
    /// Event status.
    pub status: EventStatus,
    /// Attendees.
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    /// Video conference link, if one was attached.
    pub meeting_link: Option<String>,
    /// Link to the event in the provider's web UI.
    pub html_link: Option<String>,
}

impl CalendarEvent {
    /// Returns the event bounds as a window.
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

/// Caller-supplied event contents.
///
/// Used both for generic event creation/update and for converting a
/// provisional hold into the final booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    /// Event title.
    pub summary: String,
    /// Event description.
    pub description: Option<String>,
    /// Event location.
    pub location: Option<String>,
    /// Attendees to invite.
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    /// Ask the provider to attach a video meeting link.
    #[serde(default)]
    pub request_meeting_link: bool,
}

impl EventDetails {
    /// Creates event details with the given title.
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method to set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder method to add an attendee.
    pub fn with_attendee(mut self, attendee: Attendee) -> Self {
        self.attendees.push(attendee);
        self
    }

    /// Builder method to request a meeting link.
    pub fn with_meeting_link(mut self, request: bool) -> Self {
        self.request_meeting_link = request;
        self
    }
}

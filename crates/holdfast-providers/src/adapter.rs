//! CalendarAdapter trait definition.
//!
//! This module defines the [`CalendarAdapter`] trait, the uniform capability
//! set every connected calendar account is normalized into, together with
//! the value types that cross it.
//!
//! Adapters are responsible for:
//! - Keeping their credential usable (refresh on expiry)
//! - Reporting free/busy data as a grid of [`TimeSlot`]s
//! - Creating, confirming and releasing provisional holds
//! - Managing push-notification subscriptions
//! - Generic event CRUD

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, Utc};
use holdfast_core::{
    AccountId, CalendarEvent, CredentialBundle, EventDetails, ProviderKind, TimeSlot, TimeWindow,
    WorkingHoursHint,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AdapterResult;

/// A boxed future for async trait methods.
///
/// Boxed futures keep the trait object-safe so the orchestrator can hold a
/// heterogeneous set of `Arc<dyn CalendarAdapter>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default spacing between candidate slot starts.
pub const DEFAULT_SLOT_INTERVAL_MINUTES: i64 = 60;

/// Default lifetime of a provisional hold.
pub const DEFAULT_HOLD_TTL_MINUTES: i64 = 30;

/// Parameters of an availability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    /// The window to lay candidate slots over.
    pub window: TimeWindow,
    /// Length of each candidate slot.
    pub duration_minutes: i64,
    /// Optional daily bounds for candidate generation.
    pub working_hours: Option<WorkingHoursHint>,
    /// Spacing between candidate starts.
    pub slot_interval_minutes: i64,
}

impl AvailabilityQuery {
    /// Creates a query with the default slot interval and no hint.
    pub fn new(window: TimeWindow, duration_minutes: i64) -> Self {
        Self {
            window,
            duration_minutes,
            working_hours: None,
            slot_interval_minutes: DEFAULT_SLOT_INTERVAL_MINUTES,
        }
    }

    /// Builder method to set the working-hours hint.
    pub fn with_working_hours(mut self, hint: WorkingHoursHint) -> Self {
        self.working_hours = Some(hint);
        self
    }

    /// Builder method to set the slot interval.
    pub fn with_slot_interval(mut self, minutes: i64) -> Self {
        self.slot_interval_minutes = minutes;
        self
    }

    /// Returns the slot duration, saturated to the representable range.
    pub fn duration(&self) -> Duration {
        saturating_minutes(self.duration_minutes)
    }

    /// Returns the slot interval, saturated to the representable range.
    pub fn interval(&self) -> Duration {
        saturating_minutes(self.slot_interval_minutes)
    }
}

fn saturating_minutes(minutes: i64) -> Duration {
    Duration::try_minutes(minutes).unwrap_or(if minutes < 0 {
        Duration::MIN
    } else {
        Duration::MAX
    })
}

/// Identifier of a provisional hold on one calendar.
///
/// Pairs the adapter that owns the hold with the underlying event id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProvisionalHoldId {
    /// Adapter (calendar account) that owns the hold.
    pub adapter_id: AccountId,
    /// Underlying provider event id.
    pub event_id: String,
}

impl ProvisionalHoldId {
    /// Creates a hold identifier.
    pub fn new(adapter_id: AccountId, event_id: impl Into<String>) -> Self {
        Self {
            adapter_id,
            event_id: event_id.into(),
        }
    }
}

/// A tentative reservation on one calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalHold {
    /// Composite identifier.
    pub id: ProvisionalHoldId,
    /// Start of the held slot.
    pub start: DateTime<Utc>,
    /// End of the held slot.
    pub end: DateTime<Utc>,
    /// When the hold should be considered abandoned.
    pub expires_at: DateTime<Utc>,
    /// Free-form metadata; always contains the originating request id.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ProvisionalHold {
    /// Metadata key carrying the booking-request identifier.
    pub const REQUEST_ID_KEY: &'static str = "request_id";

    /// Creates a hold for the given slot.
    pub fn new(
        id: ProvisionalHoldId,
        slot: &TimeSlot,
        request_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(Self::REQUEST_ID_KEY.to_string(), request_id.to_string());
        Self {
            id,
            start: slot.start,
            end: slot.end,
            expires_at,
            metadata,
        }
    }

    /// Returns the originating booking-request identifier.
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.get(Self::REQUEST_ID_KEY).map(String::as_str)
    }

    /// Returns true if the hold covers exactly the given slot.
    pub fn covers(&self, slot: &TimeSlot) -> bool {
        self.start == slot.start && self.end == slot.end
    }
}

/// An active push-notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    /// Adapter the channel belongs to.
    pub adapter_id: AccountId,
    /// Channel identifier chosen at subscription time.
    pub channel_id: String,
    /// Provider-side resource identifier, needed to stop the channel.
    pub resource_id: String,
    /// Address notifications are delivered to.
    pub address: String,
    /// When the provider will stop delivering, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

/// State reported by a provider push notification.
///
/// A notification is a hint that something changed, never a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Channel handshake; nothing changed.
    Sync,
    /// The watched resource changed.
    Exists,
    /// The watched resource was removed.
    NotExists,
}

impl ResourceState {
    /// Parses a provider header value such as `X-Goog-Resource-State`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "exists" => Some(Self::Exists),
            "not_exists" => Some(Self::NotExists),
            _ => None,
        }
    }

    /// Returns true if the notification reports a change.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Sync)
    }
}

/// The uniform capability set of one connected calendar account.
///
/// # Implementation Notes
///
/// - Implementations must be `Send + Sync`; the orchestrator calls them
///   concurrently from fan-out joins.
/// - Any operation rejected because the stored access credential expired
///   must call [`refresh_authentication`](Self::refresh_authentication) once
///   and retry exactly once before surfacing the error
///   (see [`with_auth_retry`](crate::retry::with_auth_retry)).
/// - [`release_provisional_hold`](Self::release_provisional_hold) must be a
///   no-op when the hold is already gone.
pub trait CalendarAdapter: Send + Sync {
    /// Returns the adapter identifier (the calendar account id).
    fn id(&self) -> &AccountId;

    /// Returns the provider kind behind this adapter.
    fn kind(&self) -> ProviderKind;

    /// Installs credentials and verifies the adapter is usable.
    ///
    /// # Errors
    ///
    /// Fails with `AuthenticationFailed` if the credentials are invalid or
    /// expired and cannot be refreshed.
    fn initialize(&self, credentials: CredentialBundle) -> BoxFuture<'_, AdapterResult<()>>;

    /// Cheap local check, no network call.
    fn is_authenticated(&self) -> bool;

    /// Exchanges the refresh credential for a new access credential.
    ///
    /// Idempotent. Fails with `AuthenticationFailed` on revoked consent.
    fn refresh_authentication(&self) -> BoxFuture<'_, AdapterResult<()>>;

    /// Returns candidate slots over the query window, each marked against
    /// the provider's free/busy data.
    ///
    /// # Errors
    ///
    /// Fails with `AvailabilityFailed` on transport or quota failure; callers
    /// treat this as "this provider is temporarily unusable", not as "no slots".
    fn get_availability<'a>(
        &'a self,
        query: &'a AvailabilityQuery,
    ) -> BoxFuture<'a, AdapterResult<Vec<TimeSlot>>>;

    /// Creates a tentative, opaque-to-attendees event covering the slot.
    ///
    /// The request id and expiry are recorded in the event's own metadata so
    /// the hold is recoverable even if the local store is lost.
    fn create_provisional_hold<'a>(
        &'a self,
        slot: &'a TimeSlot,
        request_id: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, AdapterResult<ProvisionalHold>>;

    /// Converts the tentative event into a real, attendee-visible event.
    ///
    /// # Errors
    ///
    /// Fails with `ProvisionalHoldFailed` if the hold no longer exists.
    fn confirm_provisional_hold<'a>(
        &'a self,
        hold_id: &'a ProvisionalHoldId,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>>;

    /// Deletes the tentative event. Safe to call twice.
    fn release_provisional_hold<'a>(
        &'a self,
        hold_id: &'a ProvisionalHoldId,
    ) -> BoxFuture<'a, AdapterResult<()>>;

    /// Opens a push-notification channel delivering to `address`.
    fn subscribe_to_webhook<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, AdapterResult<WebhookSubscription>>;

    /// Closes a push-notification channel.
    fn unsubscribe_from_webhook<'a>(
        &'a self,
        subscription: &'a WebhookSubscription,
    ) -> BoxFuture<'a, AdapterResult<()>>;

    /// Replaces a channel with a fresh one.
    ///
    /// Most providers do not support in-place renewal, so the default
    /// implementation unsubscribes and then resubscribes. A failed
    /// unsubscribe is logged and does not prevent the new subscription.
    fn renew_webhook_subscription<'a>(
        &'a self,
        subscription: &'a WebhookSubscription,
    ) -> BoxFuture<'a, AdapterResult<WebhookSubscription>> {
        Box::pin(async move {
            if let Err(e) = self.unsubscribe_from_webhook(subscription).await
                && !e.is_not_found()
            {
                warn!(
                    adapter = %self.id(),
                    channel = %subscription.channel_id,
                    error = %e,
                    "Failed to stop webhook channel before renewal"
                );
            }
            self.subscribe_to_webhook(&subscription.address).await
        })
    }

    /// Fetches one event.
    fn get_event<'a>(&'a self, event_id: &'a str) -> BoxFuture<'a, AdapterResult<CalendarEvent>>;

    /// Creates a confirmed event.
    fn create_event<'a>(
        &'a self,
        window: &'a TimeWindow,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>>;

    /// Replaces an event's time and contents.
    fn update_event<'a>(
        &'a self,
        event_id: &'a str,
        window: &'a TimeWindow,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>>;

    /// Deletes an event. Deleting a missing event is not an error.
    fn delete_event<'a>(&'a self, event_id: &'a str) -> BoxFuture<'a, AdapterResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 17, 0, 0).unwrap(),
        )
    }

    #[test]
    fn availability_query_defaults() {
        let query = AvailabilityQuery::new(window(), 45);
        assert_eq!(query.slot_interval_minutes, DEFAULT_SLOT_INTERVAL_MINUTES);
        assert_eq!(query.duration(), Duration::minutes(45));
        assert!(query.working_hours.is_none());

        let query = query.with_slot_interval(15);
        assert_eq!(query.interval(), Duration::minutes(15));
    }

    #[test]
    fn availability_query_saturates_minutes() {
        let query = AvailabilityQuery::new(window(), i64::MAX).with_slot_interval(i64::MIN);
        assert_eq!(query.duration(), Duration::MAX);
        assert_eq!(query.interval(), Duration::MIN);
    }

    #[test]
    fn provisional_hold_records_request_id() {
        let slot = TimeSlot::available(window().start, window().start + Duration::hours(1));
        let hold = ProvisionalHold::new(
            ProvisionalHoldId::new(AccountId::new("acct-1"), "evt-1"),
            &slot,
            "req-42",
            slot.start,
        );
        assert_eq!(hold.request_id(), Some("req-42"));
        assert!(hold.covers(&slot));
        assert_eq!(hold.id.adapter_id.as_str(), "acct-1");
    }

    #[test]
    fn resource_state_parsing() {
        assert_eq!(ResourceState::parse("sync"), Some(ResourceState::Sync));
        assert_eq!(ResourceState::parse("Exists"), Some(ResourceState::Exists));
        assert_eq!(ResourceState::parse(" not_exists "), Some(ResourceState::NotExists));
        assert_eq!(ResourceState::parse("updated"), None);
        assert!(!ResourceState::Sync.is_change());
        assert!(ResourceState::Exists.is_change());
        assert!(ResourceState::NotExists.is_change());
    }
}

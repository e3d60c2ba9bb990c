//! In-process calendar adapter.
//!
//! [`MemoryAdapter`] keeps busy intervals and events in memory and
//! implements the full [`CalendarAdapter`] contract deterministically. It
//! backs the `memory` provider kind and the orchestration tests, which use
//! its fault switches to simulate provider outages.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use holdfast_core::{
    AccountId, CalendarEvent, CredentialBundle, EventDetails, EventStatus, ProviderKind, TimeSlot,
    TimeWindow, generate_slot_grid,
};
use tracing::debug;

use crate::adapter::{
    AvailabilityQuery, BoxFuture, CalendarAdapter, ProvisionalHold, ProvisionalHoldId,
    WebhookSubscription,
};
use crate::error::{AdapterError, AdapterErrorCode, AdapterResult};
use crate::retry::with_auth_retry;

/// Lifetime of a memory webhook channel.
const CHANNEL_LIFETIME_DAYS: i64 = 7;

#[derive(Debug, Clone)]
struct HoldRecord {
    request_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Faults {
    availability: bool,
    create_hold: bool,
    /// Number of upcoming confirm calls that fail.
    confirms: u32,
    release: bool,
    revoked: bool,
    delay: Option<std::time::Duration>,
}

#[derive(Debug, Default)]
struct MemoryState {
    credentials: Option<CredentialBundle>,
    stale_token: bool,
    busy: Vec<TimeWindow>,
    events: BTreeMap<String, CalendarEvent>,
    holds: BTreeMap<String, HoldRecord>,
    subscriptions: BTreeMap<String, WebhookSubscription>,
    faults: Faults,
    next_id: u64,
    refresh_calls: usize,
    availability_calls: usize,
    release_calls: usize,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn busy_windows(&self) -> Vec<TimeWindow> {
        self.busy
            .iter()
            .copied()
            .chain(
                self.events
                    .values()
                    .filter(|e| e.status != EventStatus::Cancelled)
                    .map(CalendarEvent::window),
            )
            .collect()
    }
}

/// A calendar that lives in process memory.
pub struct MemoryAdapter {
    id: AccountId,
    calendar_id: String,
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    /// Creates an empty, unauthenticated calendar.
    pub fn new(id: impl Into<AccountId>) -> Self {
        Self {
            id: id.into(),
            calendar_id: "memory".to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Creates a calendar that is already initialized with a dummy credential.
    pub fn authenticated(id: impl Into<AccountId>) -> Self {
        let adapter = Self::new(id);
        adapter.state().credentials = Some(CredentialBundle::new(
            "memory-token-0",
            Some("memory-refresh".to_string()),
            None,
        ));
        adapter
    }

    /// Builder method to mark an interval busy.
    pub fn with_busy(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.add_busy(TimeWindow::new(start, end));
        self
    }

    /// Marks an interval busy.
    pub fn add_busy(&self, window: TimeWindow) {
        self.state().busy.push(window);
    }

    /// Makes every availability query fail.
    pub fn fail_availability(&self, fail: bool) {
        self.state().faults.availability = fail;
    }

    /// Makes every hold creation fail.
    pub fn fail_create_holds(&self, fail: bool) {
        self.state().faults.create_hold = fail;
    }

    /// Makes the next `times` confirm calls fail.
    pub fn fail_confirms(&self, times: u32) {
        self.state().faults.confirms = times;
    }

    /// Makes every release fail.
    pub fn fail_releases(&self, fail: bool) {
        self.state().faults.release = fail;
    }

    /// Delays every availability answer.
    pub fn set_delay(&self, delay: std::time::Duration) {
        self.state().faults.delay = Some(delay);
    }

    /// Invalidates the current access token; the next call is rejected
    /// until the adapter refreshes.
    pub fn expire_access_token(&self) {
        self.state().stale_token = true;
    }

    /// Makes refreshes fail as if the user revoked consent.
    pub fn revoke_consent(&self) {
        let mut state = self.state();
        state.faults.revoked = true;
        state.stale_token = true;
    }

    /// Returns the ids of the tentative holds still on the calendar.
    pub fn live_holds(&self) -> Vec<ProvisionalHoldId> {
        self.state()
            .holds
            .keys()
            .map(|event_id| ProvisionalHoldId::new(self.id.clone(), event_id.clone()))
            .collect()
    }

    /// Returns every event currently on the calendar.
    pub fn events(&self) -> Vec<CalendarEvent> {
        self.state().events.values().cloned().collect()
    }

    /// Returns the confirmed events.
    pub fn confirmed_events(&self) -> Vec<CalendarEvent> {
        self.state()
            .events
            .values()
            .filter(|e| e.status == EventStatus::Confirmed)
            .cloned()
            .collect()
    }

    /// Returns the open webhook channels.
    pub fn subscriptions(&self) -> Vec<WebhookSubscription> {
        self.state().subscriptions.values().cloned().collect()
    }

    /// Number of refresh attempts so far.
    pub fn refresh_calls(&self) -> usize {
        self.state().refresh_calls
    }

    /// Number of availability queries answered so far (including failures).
    pub fn availability_calls(&self) -> usize {
        self.state().availability_calls
    }

    /// Number of release calls so far (including no-ops).
    pub fn release_calls(&self) -> usize {
        self.state().release_calls
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error(&self, err: AdapterError) -> AdapterError {
        err.with_adapter(self.id.as_str())
    }

    fn check_auth(&self, state: &MemoryState) -> AdapterResult<()> {
        if state.credentials.is_none() {
            return Err(self.error(AdapterError::authentication("adapter not initialized")));
        }
        if state.stale_token {
            return Err(self.error(AdapterError::authentication("access token expired")));
        }
        Ok(())
    }

    fn make_event(
        &self,
        id: String,
        window: &TimeWindow,
        details: &EventDetails,
        status: EventStatus,
    ) -> CalendarEvent {
        CalendarEvent {
            meeting_link: details
                .request_meeting_link
                .then(|| format!("https://meet.example.invalid/{}", id)),
            id,
            account_id: self.id.to_string(),
            calendar_id: self.calendar_id.clone(),
            summary: details.summary.clone(),
            description: details.description.clone(),
            location: details.location.clone(),
            start: window.start,
            end: window.end,
            status,
            attendees: details.attendees.clone(),
            html_link: None,
        }
    }

    fn availability_once(&self, query: &AvailabilityQuery) -> AdapterResult<Vec<TimeSlot>> {
        let mut state = self.state();
        state.availability_calls += 1;
        self.check_auth(&state)?;
        if state.faults.availability {
            return Err(self.error(AdapterError::availability("injected availability failure")));
        }
        let busy = state.busy_windows();
        Ok(generate_slot_grid(
            &query.window,
            query.duration(),
            query.interval(),
            query.working_hours.as_ref(),
            &busy,
        ))
    }

    fn create_hold_once(
        &self,
        slot: &TimeSlot,
        request_id: &str,
        ttl: Duration,
    ) -> AdapterResult<ProvisionalHold> {
        let mut state = self.state();
        self.check_auth(&state)?;
        if state.faults.create_hold {
            return Err(self.error(AdapterError::provisional_hold("injected hold failure")));
        }
        if state.busy_windows().iter().any(|b| b.overlaps(slot.start, slot.end)) {
            return Err(self.error(AdapterError::provisional_hold("slot is no longer free")));
        }

        let event_id = state.next_id("hold");
        let Some(expires_at) = Utc::now().checked_add_signed(ttl) else {
            return Err(self.error(AdapterError::provisional_hold("hold expiry is out of range")));
        };
        let details = EventDetails::new("Hold");
        let event = self.make_event(event_id.clone(), &slot.window(), &details, EventStatus::Tentative);
        state.events.insert(event_id.clone(), event);
        state.holds.insert(
            event_id.clone(),
            HoldRecord {
                request_id: request_id.to_string(),
                expires_at,
            },
        );
        debug!(adapter = %self.id, event_id = %event_id, request_id, "Created memory hold");

        Ok(ProvisionalHold::new(
            ProvisionalHoldId::new(self.id.clone(), event_id),
            slot,
            request_id,
            expires_at,
        ))
    }

    fn confirm_once(
        &self,
        hold_id: &ProvisionalHoldId,
        details: &EventDetails,
    ) -> AdapterResult<CalendarEvent> {
        let mut state = self.state();
        self.check_auth(&state)?;
        if state.faults.confirms > 0 {
            state.faults.confirms -= 1;
            return Err(self.error(
                AdapterError::server("injected confirm failure")
                    .during(AdapterErrorCode::ProvisionalHoldFailed),
            ));
        }
        if !state.holds.contains_key(&hold_id.event_id) {
            return Err(self.error(AdapterError::provisional_hold(format!(
                "hold {} no longer exists",
                hold_id.event_id
            ))));
        }
        let window = match state.events.get(&hold_id.event_id) {
            Some(event) => event.window(),
            None => {
                return Err(self.error(AdapterError::provisional_hold(format!(
                    "hold {} no longer exists",
                    hold_id.event_id
                ))));
            }
        };

        let event = self.make_event(hold_id.event_id.clone(), &window, details, EventStatus::Confirmed);
        state.holds.remove(&hold_id.event_id);
        state.events.insert(hold_id.event_id.clone(), event.clone());
        Ok(event)
    }

    fn release_once(&self, hold_id: &ProvisionalHoldId) -> AdapterResult<()> {
        let mut state = self.state();
        state.release_calls += 1;
        self.check_auth(&state)?;
        if state.faults.release {
            return Err(self.error(AdapterError::provisional_hold("injected release failure")));
        }
        if state.holds.remove(&hold_id.event_id).is_some() {
            state.events.remove(&hold_id.event_id);
        }
        Ok(())
    }

    fn subscribe_once(&self, address: &str) -> AdapterResult<WebhookSubscription> {
        let mut state = self.state();
        self.check_auth(&state)?;
        let channel_id = state.next_id("channel");
        let subscription = WebhookSubscription {
            adapter_id: self.id.clone(),
            channel_id: channel_id.clone(),
            resource_id: format!("resource-{}", self.id),
            address: address.to_string(),
            expires_at: Some(Utc::now() + Duration::days(CHANNEL_LIFETIME_DAYS)),
        };
        state.subscriptions.insert(channel_id, subscription.clone());
        Ok(subscription)
    }

    fn unsubscribe_once(&self, subscription: &WebhookSubscription) -> AdapterResult<()> {
        let mut state = self.state();
        self.check_auth(&state)?;
        match state.subscriptions.remove(&subscription.channel_id) {
            Some(_) => Ok(()),
            None => Err(self.error(AdapterError::not_found(format!(
                "channel {} not found",
                subscription.channel_id
            )))),
        }
    }

    fn get_event_once(&self, event_id: &str) -> AdapterResult<CalendarEvent> {
        let state = self.state();
        self.check_auth(&state)?;
        state
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| self.error(AdapterError::not_found(format!("event {} not found", event_id))))
    }

    fn write_event_once(
        &self,
        event_id: Option<&str>,
        window: &TimeWindow,
        details: &EventDetails,
    ) -> AdapterResult<CalendarEvent> {
        let mut state = self.state();
        self.check_auth(&state)?;
        let id = match event_id {
            Some(id) if state.events.contains_key(id) => id.to_string(),
            Some(id) => {
                return Err(self.error(AdapterError::not_found(format!("event {} not found", id))));
            }
            None => state.next_id("event"),
        };
        let event = self.make_event(id.clone(), window, details, EventStatus::Confirmed);
        state.holds.remove(&id);
        state.events.insert(id, event.clone());
        Ok(event)
    }

    fn delete_event_once(&self, event_id: &str) -> AdapterResult<()> {
        let mut state = self.state();
        self.check_auth(&state)?;
        state.events.remove(event_id);
        state.holds.remove(event_id);
        Ok(())
    }
}

impl CalendarAdapter for MemoryAdapter {
    fn id(&self) -> &AccountId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Memory
    }

    fn initialize(&self, credentials: CredentialBundle) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(async move {
            let expired = credentials.is_expired();
            if expired && !credentials.can_refresh() {
                return Err(self.error(AdapterError::authentication(
                    "credential expired and no refresh token available",
                )));
            }
            {
                let mut state = self.state();
                state.credentials = Some(credentials);
                state.stale_token = expired;
            }
            if expired {
                self.refresh_authentication().await?;
            }
            Ok(())
        })
    }

    fn is_authenticated(&self) -> bool {
        let state = self.state();
        state.credentials.is_some() && !state.faults.revoked
    }

    fn refresh_authentication(&self) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.refresh_calls += 1;
            if state.faults.revoked {
                return Err(self.error(AdapterError::authentication("consent revoked")));
            }
            let refresh_calls = state.refresh_calls;
            let Some(credentials) = state.credentials.as_mut() else {
                return Err(self.error(AdapterError::authentication("adapter not initialized")));
            };
            if !credentials.can_refresh() {
                return Err(self.error(AdapterError::authentication("no refresh token available")));
            }
            credentials.access_token = format!("memory-token-{}", refresh_calls);
            credentials.expires_at = Some(Utc::now() + Duration::hours(1));
            state.stale_token = false;
            Ok(())
        })
    }

    fn get_availability<'a>(
        &'a self,
        query: &'a AvailabilityQuery,
    ) -> BoxFuture<'a, AdapterResult<Vec<TimeSlot>>> {
        Box::pin(async move {
            let delay = self.state().faults.delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            with_auth_retry(self, move || async move { self.availability_once(query) }).await
        })
    }

    fn create_provisional_hold<'a>(
        &'a self,
        slot: &'a TimeSlot,
        request_id: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, AdapterResult<ProvisionalHold>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.create_hold_once(slot, request_id, ttl)
        }))
    }

    fn confirm_provisional_hold<'a>(
        &'a self,
        hold_id: &'a ProvisionalHoldId,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.confirm_once(hold_id, details)
        }))
    }

    fn release_provisional_hold<'a>(
        &'a self,
        hold_id: &'a ProvisionalHoldId,
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.release_once(hold_id)
        }))
    }

    fn subscribe_to_webhook<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, AdapterResult<WebhookSubscription>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.subscribe_once(address)
        }))
    }

    fn unsubscribe_from_webhook<'a>(
        &'a self,
        subscription: &'a WebhookSubscription,
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.unsubscribe_once(subscription)
        }))
    }

    fn get_event<'a>(&'a self, event_id: &'a str) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.get_event_once(event_id)
        }))
    }

    fn create_event<'a>(
        &'a self,
        window: &'a TimeWindow,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.write_event_once(None, window, details)
        }))
    }

    fn update_event<'a>(
        &'a self,
        event_id: &'a str,
        window: &'a TimeWindow,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.write_event_once(Some(event_id), window, details)
        }))
    }

    fn delete_event<'a>(&'a self, event_id: &'a str) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(with_auth_retry(self, move || async move {
            self.delete_event_once(event_id)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn query() -> AvailabilityQuery {
        AvailabilityQuery::new(TimeWindow::new(utc(9, 0), utc(12, 0)), 60)
    }

    #[tokio::test]
    async fn availability_marks_busy_slots() {
        let adapter = MemoryAdapter::authenticated("a").with_busy(utc(10, 0), utc(11, 0));
        let slots = adapter.get_availability(&query()).await.unwrap();
        let free: Vec<_> = slots.iter().map(|s| s.available).collect();
        assert_eq!(free, vec![true, false, true]);
    }

    #[tokio::test]
    async fn uninitialized_adapter_rejects_calls() {
        let adapter = MemoryAdapter::new("a");
        assert!(!adapter.is_authenticated());
        let err = adapter.get_availability(&query()).await.unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn initialize_refreshes_expired_credentials() {
        let adapter = MemoryAdapter::new("a");
        let expired = CredentialBundle::new(
            "old",
            Some("refresh".to_string()),
            Some(Utc::now() - Duration::hours(1)),
        );
        adapter.initialize(expired).await.unwrap();
        assert!(adapter.is_authenticated());
        assert_eq!(adapter.refresh_calls(), 1);

        let dead = CredentialBundle::new("old", None, Some(Utc::now() - Duration::hours(1)));
        let err = MemoryAdapter::new("b").initialize(dead).await.unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_retried_once() {
        let adapter = MemoryAdapter::authenticated("a");
        adapter.expire_access_token();

        let slots = adapter.get_availability(&query()).await.unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(adapter.refresh_calls(), 1);
        assert_eq!(adapter.availability_calls(), 2);
    }

    #[tokio::test]
    async fn revoked_consent_surfaces_authentication_error() {
        let adapter = MemoryAdapter::authenticated("a");
        adapter.revoke_consent();

        let err = adapter.get_availability(&query()).await.unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(adapter.refresh_calls(), 1);
        assert!(!adapter.is_authenticated());
    }

    #[tokio::test]
    async fn hold_lifecycle() {
        let adapter = MemoryAdapter::authenticated("a");
        let slot = TimeSlot::available(utc(9, 0), utc(10, 0));
        let hold = adapter
            .create_provisional_hold(&slot, "req-1", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(hold.request_id(), Some("req-1"));
        assert_eq!(adapter.live_holds(), vec![hold.id.clone()]);

        // The hold now blocks the slot
        let slots = adapter.get_availability(&query()).await.unwrap();
        assert!(!slots[0].available);

        let event = adapter
            .confirm_provisional_hold(&hold.id, &EventDetails::new("Intro call"))
            .await
            .unwrap();
        assert_eq!(event.status, EventStatus::Confirmed);
        assert_eq!(event.summary, "Intro call");
        assert!(adapter.live_holds().is_empty());

        // Confirming again fails: the hold is gone
        let err = adapter
            .confirm_provisional_hold(&hold.id, &EventDetails::new("Intro call"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdapterErrorCode::ProvisionalHoldFailed);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let adapter = MemoryAdapter::authenticated("a");
        let slot = TimeSlot::available(utc(9, 0), utc(10, 0));
        let hold = adapter
            .create_provisional_hold(&slot, "req-1", Duration::minutes(30))
            .await
            .unwrap();

        adapter.release_provisional_hold(&hold.id).await.unwrap();
        adapter.release_provisional_hold(&hold.id).await.unwrap();
        assert!(adapter.live_holds().is_empty());
        assert!(adapter.events().is_empty());
        assert_eq!(adapter.release_calls(), 2);
    }

    #[tokio::test]
    async fn hold_on_busy_slot_fails() {
        let adapter = MemoryAdapter::authenticated("a").with_busy(utc(9, 30), utc(10, 30));
        let slot = TimeSlot::available(utc(9, 0), utc(10, 0));
        let err = adapter
            .create_provisional_hold(&slot, "req-1", Duration::minutes(30))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdapterErrorCode::ProvisionalHoldFailed);
        assert_eq!(err.adapter(), Some("a"));
    }

    #[tokio::test]
    async fn hold_expiry_out_of_range_fails() {
        let adapter = MemoryAdapter::authenticated("a");
        let slot = TimeSlot::available(utc(9, 0), utc(10, 0));
        let err = adapter
            .create_provisional_hold(&slot, "req-1", Duration::MAX)
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdapterErrorCode::ProvisionalHoldFailed);
        assert!(adapter.live_holds().is_empty());
        assert!(adapter.events().is_empty());
    }

    #[tokio::test]
    async fn injected_confirm_failures_count_down() {
        let adapter = MemoryAdapter::authenticated("a");
        let slot = TimeSlot::available(utc(9, 0), utc(10, 0));
        let hold = adapter
            .create_provisional_hold(&slot, "req-1", Duration::minutes(30))
            .await
            .unwrap();

        adapter.fail_confirms(1);
        let err = adapter
            .confirm_provisional_hold(&hold.id, &EventDetails::new("x"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(
            adapter
                .confirm_provisional_hold(&hold.id, &EventDetails::new("x"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn webhook_renewal_replaces_channel() {
        let adapter = MemoryAdapter::authenticated("a");
        let first = adapter.subscribe_to_webhook("https://hooks.example.com/cal").await.unwrap();
        let renewed = adapter.renew_webhook_subscription(&first).await.unwrap();

        assert_ne!(first.channel_id, renewed.channel_id);
        assert_eq!(renewed.address, "https://hooks.example.com/cal");
        let open = adapter.subscriptions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].channel_id, renewed.channel_id);
    }

    #[tokio::test]
    async fn event_crud() {
        let adapter = MemoryAdapter::authenticated("a");
        let window = TimeWindow::new(utc(13, 0), utc(14, 0));
        let created = adapter
            .create_event(&window, &EventDetails::new("Lunch").with_meeting_link(true))
            .await
            .unwrap();
        assert!(created.meeting_link.is_some());

        let later = TimeWindow::new(utc(14, 0), utc(15, 0));
        let updated = adapter
            .update_event(&created.id, &later, &EventDetails::new("Late lunch"))
            .await
            .unwrap();
        assert_eq!(updated.start, utc(14, 0));
        assert_eq!(adapter.get_event(&created.id).await.unwrap().summary, "Late lunch");

        adapter.delete_event(&created.id).await.unwrap();
        assert!(adapter.get_event(&created.id).await.unwrap_err().is_not_found());
        // Deleting twice is fine
        adapter.delete_event(&created.id).await.unwrap();
    }
}

//! Google Calendar adapter implementation.
//!
//! This module implements the [`CalendarAdapter`] trait for Google Calendar.
//! Provisional holds are tentative private events tagged through
//! `extendedProperties.private`, so they can be recognized (and swept) from
//! the calendar alone.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use holdfast_core::{
    AccountId, CalendarEvent, CredentialBundle, EventDetails, ProviderKind, TimeSlot, TimeWindow,
    generate_slot_grid,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::adapter::{
    AvailabilityQuery, BoxFuture, CalendarAdapter, ProvisionalHold, ProvisionalHoldId,
    WebhookSubscription,
};
use crate::error::{AdapterError, AdapterErrorCode, AdapterResult};
use crate::retry::with_auth_retry;

use super::client::{
    ApiEvent, AttendeeWrite, ConferenceDataWrite, EventWrite, ExtendedPropertiesWrite,
    GoogleCalendarClient,
};
use super::config::GoogleConfig;
use super::oauth::OAuthClient;
use super::tokens::TokenStorage;

/// Private property marking an event as a holdfast hold (`"1"` while tentative).
pub const HOLD_MARKER_KEY: &str = "holdfastHold";
/// Private property carrying the booking-request id.
pub const REQUEST_ID_KEY: &str = "holdfastRequestId";
/// Private property carrying the hold expiry (RFC 3339).
pub const EXPIRES_AT_KEY: &str = "holdfastExpiresAt";

/// Google Calendar adapter.
pub struct GoogleAdapter {
    id: AccountId,
    config: GoogleConfig,
    client: GoogleCalendarClient,
    oauth_client: OAuthClient,
    token_storage: TokenStorage,
    /// Serializes refreshes so concurrent 401s trigger one token exchange.
    refresh_lock: Mutex<()>,
}

impl GoogleAdapter {
    /// Creates a new Google adapter for one calendar account.
    ///
    /// This loads any persisted tokens but does not contact Google; call
    /// [`CalendarAdapter::initialize`] before use.
    pub fn new(id: impl Into<AccountId>, config: GoogleConfig) -> AdapterResult<Self> {
        let id = id.into();
        config
            .validate()
            .map_err(|e| AdapterError::configuration(e).with_adapter(id.as_str()))?;

        let token_storage = match &config.token_path {
            Some(path) => TokenStorage::with_file(path),
            None => TokenStorage::in_memory(),
        };
        token_storage.load()?;

        Ok(Self {
            client: GoogleCalendarClient::new(&config)?,
            oauth_client: OAuthClient::new(&config)?,
            id,
            config,
            token_storage,
            refresh_lock: Mutex::new(()),
        })
    }

    fn error(&self, err: AdapterError) -> AdapterError {
        err.with_adapter(self.id.as_str())
    }

    fn calendar_id(&self) -> &str {
        &self.config.calendar_id
    }

    /// Returns a usable access token, refreshing first if it is known to
    /// be expired.
    async fn access_token(&self) -> AdapterResult<String> {
        let tokens = self
            .token_storage
            .get()
            .ok_or_else(|| self.error(AdapterError::authentication("adapter not initialized")))?;

        if tokens.is_expired() && tokens.can_refresh() {
            debug!(adapter = %self.id, "access token expired, refreshing proactively");
            self.refresh_authentication().await?;
            return self
                .token_storage
                .access_token()
                .ok_or_else(|| self.error(AdapterError::internal("token vanished after refresh")));
        }
        Ok(tokens.access_token)
    }

    fn to_event(&self, event: ApiEvent) -> AdapterResult<CalendarEvent> {
        event
            .into_calendar_event(self.id.as_str(), self.calendar_id())
            .map_err(|e| self.error(e))
    }

    fn hold_write(&self, slot: &TimeSlot, request_id: &str, expires_at: DateTime<Utc>) -> EventWrite {
        let mut private = BTreeMap::new();
        private.insert(HOLD_MARKER_KEY.to_string(), "1".to_string());
        private.insert(REQUEST_ID_KEY.to_string(), request_id.to_string());
        private.insert(EXPIRES_AT_KEY.to_string(), expires_at.to_rfc3339());

        EventWrite {
            summary: Some(self.config.hold_summary.clone()),
            start: Some(slot.start.into()),
            end: Some(slot.end.into()),
            status: Some("tentative".to_string()),
            transparency: Some("opaque".to_string()),
            visibility: Some("private".to_string()),
            extended_properties: Some(ExtendedPropertiesWrite { private }),
            ..Default::default()
        }
    }

    fn details_write(&self, details: &EventDetails, window: Option<&TimeWindow>) -> EventWrite {
        EventWrite {
            summary: Some(details.summary.clone()),
            description: details.description.clone(),
            location: details.location.clone(),
            start: window.map(|w| w.start.into()),
            end: window.map(|w| w.end.into()),
            status: Some("confirmed".to_string()),
            transparency: Some("opaque".to_string()),
            visibility: Some("default".to_string()),
            attendees: Some(details.attendees.iter().map(AttendeeWrite::from).collect()),
            conference_data: details
                .request_meeting_link
                .then(|| ConferenceDataWrite::meet(uuid::Uuid::new_v4().to_string())),
            ..Default::default()
        }
    }

    /// Checks that an event is a live holdfast hold.
    fn verify_hold(&self, event: &ApiEvent, now: DateTime<Utc>) -> AdapterResult<()> {
        if event.private_property(HOLD_MARKER_KEY) != Some("1")
            || event.status.as_deref() == Some("cancelled")
        {
            return Err(self.error(AdapterError::provisional_hold(format!(
                "event {} is not a provisional hold",
                event.id
            ))));
        }
        let expires_at = event
            .private_property(EXPIRES_AT_KEY)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(expires_at) = expires_at
            && expires_at <= now
        {
            return Err(self.error(AdapterError::provisional_hold(format!(
                "hold {} expired at {}",
                event.id, expires_at
            ))));
        }
        Ok(())
    }

    async fn confirm_once(
        &self,
        hold_id: &ProvisionalHoldId,
        details: &EventDetails,
    ) -> AdapterResult<CalendarEvent> {
        let token = self.access_token().await?;
        let event = match self
            .client
            .get_event(&token, self.calendar_id(), &hold_id.event_id)
            .await
        {
            Ok(event) => event,
            Err(e) if e.is_not_found() => {
                return Err(self.error(AdapterError::provisional_hold(format!(
                    "hold {} no longer exists",
                    hold_id.event_id
                ))));
            }
            Err(e) => return Err(self.error(e.during(AdapterErrorCode::ProvisionalHoldFailed))),
        };
        self.verify_hold(&event, Utc::now())?;

        let mut write = self.details_write(details, None);
        let mut private = BTreeMap::new();
        private.insert(HOLD_MARKER_KEY.to_string(), "0".to_string());
        write.extended_properties = Some(ExtendedPropertiesWrite { private });

        let confirmed = self
            .client
            .patch_event(&token, self.calendar_id(), &hold_id.event_id, &write)
            .await
            .map_err(|e| self.error(e.during(AdapterErrorCode::ProvisionalHoldFailed)))?;
        info!(adapter = %self.id, event_id = %hold_id.event_id, "Confirmed provisional hold");
        self.to_event(confirmed)
    }
}

impl CalendarAdapter for GoogleAdapter {
    fn id(&self) -> &AccountId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn initialize(&self, credentials: CredentialBundle) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(async move {
            // A persisted token is newer than the one in the account record
            let credentials = match self.token_storage.get() {
                Some(stored) if stored.refresh_token == credentials.refresh_token => stored,
                _ => credentials,
            };

            if credentials.is_expired() && !credentials.can_refresh() {
                return Err(self.error(AdapterError::authentication(
                    "credential expired and no refresh token available",
                )));
            }
            let expired = credentials.is_expired();
            self.token_storage.set(credentials)?;

            if expired {
                self.refresh_authentication().await?;
            }
            debug!(adapter = %self.id, calendar = %self.calendar_id(), "Google adapter initialized");
            Ok(())
        })
    }

    fn is_authenticated(&self) -> bool {
        self.token_storage
            .get()
            .is_some_and(|t| !t.is_expired() || t.can_refresh())
    }

    fn refresh_authentication(&self) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(async move {
            let before = self.token_storage.access_token();
            let _guard = self.refresh_lock.lock().await;

            // Another task refreshed while we waited
            if self.token_storage.access_token() != before {
                return Ok(());
            }

            let refresh_token = self.token_storage.refresh_token().ok_or_else(|| {
                self.error(AdapterError::authentication(
                    "no refresh token - re-authentication required",
                ))
            })?;

            let (access_token, expires_in) = self
                .oauth_client
                .refresh_token(&refresh_token)
                .await
                .map_err(|e| self.error(e))?;
            self.token_storage
                .update_access_token(access_token, expires_in)
                .map_err(|e| self.error(e))
        })
    }

    fn get_availability<'a>(
        &'a self,
        query: &'a AvailabilityQuery,
    ) -> BoxFuture<'a, AdapterResult<Vec<TimeSlot>>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            let busy = self
                .client
                .free_busy(&token, self.calendar_id(), &query.window)
                .await
                .map_err(|e| self.error(e.during(AdapterErrorCode::AvailabilityFailed)))?;
            Ok(generate_slot_grid(
                &query.window,
                query.duration(),
                query.interval(),
                query.working_hours.as_ref(),
                &busy,
            ))
        }))
    }

    fn create_provisional_hold<'a>(
        &'a self,
        slot: &'a TimeSlot,
        request_id: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, AdapterResult<ProvisionalHold>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            let expires_at = Utc::now().checked_add_signed(ttl).ok_or_else(|| {
                self.error(AdapterError::provisional_hold("hold expiry is out of range"))
            })?;
            let write = self.hold_write(slot, request_id, expires_at);
            let event = self
                .client
                .insert_event(&token, self.calendar_id(), &write)
                .await
                .map_err(|e| self.error(e.during(AdapterErrorCode::ProvisionalHoldFailed)))?;
            debug!(adapter = %self.id, event_id = %event.id, request_id, "Created provisional hold");
            Ok(ProvisionalHold::new(
                ProvisionalHoldId::new(self.id.clone(), event.id),
                slot,
                request_id,
                expires_at,
            ))
        }))
    }

    fn confirm_provisional_hold<'a>(
        &'a self,
        hold_id: &'a ProvisionalHoldId,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || self.confirm_once(hold_id, details)))
    }

    fn release_provisional_hold<'a>(
        &'a self,
        hold_id: &'a ProvisionalHoldId,
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            match self
                .client
                .delete_event(&token, self.calendar_id(), &hold_id.event_id)
                .await
            {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => {
                    debug!(adapter = %self.id, event_id = %hold_id.event_id, "Hold already gone");
                    Ok(())
                }
                Err(e) => Err(self.error(e.during(AdapterErrorCode::ProvisionalHoldFailed))),
            }
        }))
    }

    fn subscribe_to_webhook<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, AdapterResult<WebhookSubscription>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            let channel_id = uuid::Uuid::new_v4().to_string();
            let channel = self
                .client
                .watch(&token, self.calendar_id(), &channel_id, address)
                .await
                .map_err(|e| self.error(e.during(AdapterErrorCode::WebhookFailed)))?;
            Ok(WebhookSubscription {
                adapter_id: self.id.clone(),
                expires_at: channel.expires_at(),
                channel_id: channel.id,
                resource_id: channel.resource_id,
                address: address.to_string(),
            })
        }))
    }

    fn unsubscribe_from_webhook<'a>(
        &'a self,
        subscription: &'a WebhookSubscription,
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            self.client
                .stop_channel(&token, &subscription.channel_id, &subscription.resource_id)
                .await
                .map_err(|e| self.error(e.during(AdapterErrorCode::WebhookFailed)))
        }))
    }

    fn get_event<'a>(&'a self, event_id: &'a str) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            let event = self
                .client
                .get_event(&token, self.calendar_id(), event_id)
                .await
                .map_err(|e| self.error(e.during(AdapterErrorCode::EventFailed)))?;
            self.to_event(event)
        }))
    }

    fn create_event<'a>(
        &'a self,
        window: &'a TimeWindow,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            let write = self.details_write(details, Some(window));
            let event = self
                .client
                .insert_event(&token, self.calendar_id(), &write)
                .await
                .map_err(|e| self.error(e.during(AdapterErrorCode::EventFailed)))?;
            self.to_event(event)
        }))
    }

    fn update_event<'a>(
        &'a self,
        event_id: &'a str,
        window: &'a TimeWindow,
        details: &'a EventDetails,
    ) -> BoxFuture<'a, AdapterResult<CalendarEvent>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            let write = self.details_write(details, Some(window));
            let event = self
                .client
                .patch_event(&token, self.calendar_id(), event_id, &write)
                .await
                .map_err(|e| self.error(e.during(AdapterErrorCode::EventFailed)))?;
            self.to_event(event)
        }))
    }

    fn delete_event<'a>(&'a self, event_id: &'a str) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(with_auth_retry(self, move || async move {
            let token = self.access_token().await?;
            match self.client.delete_event(&token, self.calendar_id(), event_id).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(self.error(e.during(AdapterErrorCode::EventFailed))),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::google::OAuthCredentials;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn config(server: &MockServer) -> GoogleConfig {
        GoogleConfig::new(OAuthCredentials::new(
            "test-client.apps.googleusercontent.com",
            "test-secret",
        ))
        .with_api_base_url(server.uri())
        .with_token_url(format!("{}/token", server.uri()))
    }

    async fn adapter(server: &MockServer, access_token: &str) -> GoogleAdapter {
        let adapter = GoogleAdapter::new("work", config(server)).unwrap();
        adapter
            .initialize(CredentialBundle::new(
                access_token,
                Some("refresh".to_string()),
                Some(Utc::now() + Duration::hours(1)),
            ))
            .await
            .unwrap();
        adapter
    }

    async fn mount_token_endpoint(server: &MockServer, new_token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": new_token,
                "expires_in": 3600
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn free_busy_body() -> serde_json::Value {
        serde_json::json!({
            "calendars": {
                "primary": {
                    "busy": [{"start": "2025-03-01T10:00:00Z", "end": "2025-03-01T11:00:00Z"}]
                }
            }
        })
    }

    fn hold_event(expires_at: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "id": "evt-1",
            "status": "tentative",
            "summary": "Hold",
            "start": {"dateTime": "2025-03-01T09:00:00Z"},
            "end": {"dateTime": "2025-03-01T10:00:00Z"},
            "extendedProperties": {"private": {
                "holdfastHold": "1",
                "holdfastRequestId": "req-1",
                "holdfastExpiresAt": expires_at.to_rfc3339()
            }}
        })
    }

    #[tokio::test]
    async fn availability_marks_busy_periods() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/freeBusy"))
            .and(header("authorization", "Bearer good"))
            .and(body_partial_json(serde_json::json!({"items": [{"id": "primary"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(free_busy_body()))
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        let query = AvailabilityQuery::new(TimeWindow::new(utc(9, 0), utc(12, 0)), 60);
        let slots = adapter.get_availability(&query).await.unwrap();

        let free: Vec<_> = slots.iter().map(|s| s.available).collect();
        assert_eq!(free, vec![true, false, true]);
    }

    #[tokio::test]
    async fn unauthorized_call_refreshes_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/freeBusy"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/freeBusy"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(free_busy_body()))
            .expect(1)
            .mount(&server)
            .await;
        mount_token_endpoint(&server, "fresh").await;

        let adapter = adapter(&server, "stale").await;
        let query = AvailabilityQuery::new(TimeWindow::new(utc(9, 0), utc(12, 0)), 60);
        let slots = adapter.get_availability(&query).await.unwrap();
        assert_eq!(slots.len(), 3);
    }

    #[tokio::test]
    async fn second_unauthorized_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/freeBusy"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        mount_token_endpoint(&server, "fresh").await;

        let adapter = adapter(&server, "stale").await;
        let query = AvailabilityQuery::new(TimeWindow::new(utc(9, 0), utc(12, 0)), 60);
        let err = adapter.get_availability(&query).await.unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(err.adapter(), Some("work"));
    }

    #[tokio::test]
    async fn availability_outage_is_availability_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/freeBusy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        let query = AvailabilityQuery::new(TimeWindow::new(utc(9, 0), utc(12, 0)), 60);
        let err = adapter.get_availability(&query).await.unwrap_err();
        assert_eq!(err.code(), AdapterErrorCode::AvailabilityFailed);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn create_hold_tags_private_properties() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(body_partial_json(serde_json::json!({
                "status": "tentative",
                "visibility": "private",
                "extendedProperties": {"private": {"holdfastHold": "1", "holdfastRequestId": "req-1"}}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(hold_event(Utc::now() + Duration::minutes(30))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        let slot = TimeSlot::available(utc(9, 0), utc(10, 0));
        let hold = adapter
            .create_provisional_hold(&slot, "req-1", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(hold.id.event_id, "evt-1");
        assert_eq!(hold.id.adapter_id.as_str(), "work");
        assert_eq!(hold.request_id(), Some("req-1"));
    }

    #[tokio::test]
    async fn confirm_patches_hold_into_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events/evt-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(hold_event(Utc::now() + Duration::minutes(30))),
            )
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/calendars/primary/events/evt-1"))
            .and(query_param("sendUpdates", "all"))
            .and(query_param("conferenceDataVersion", "1"))
            .and(body_partial_json(serde_json::json!({
                "status": "confirmed",
                "summary": "Intro call",
                "attendees": [{"email": "client@example.com"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt-1",
                "status": "confirmed",
                "summary": "Intro call",
                "start": {"dateTime": "2025-03-01T09:00:00Z"},
                "end": {"dateTime": "2025-03-01T10:00:00Z"},
                "hangoutLink": "https://meet.google.com/abc-defg-hij",
                "attendees": [{"email": "client@example.com"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        let details = EventDetails::new("Intro call")
            .with_attendee(holdfast_core::Attendee::new("client@example.com"))
            .with_meeting_link(true);
        let event = adapter
            .confirm_provisional_hold(&ProvisionalHoldId::new("work".into(), "evt-1"), &details)
            .await
            .unwrap();
        assert_eq!(event.status, holdfast_core::EventStatus::Confirmed);
        assert_eq!(event.meeting_link.as_deref(), Some("https://meet.google.com/abc-defg-hij"));
    }

    #[tokio::test]
    async fn confirm_rejects_expired_hold() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events/evt-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(hold_event(Utc::now() - Duration::minutes(1))),
            )
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        let err = adapter
            .confirm_provisional_hold(
                &ProvisionalHoldId::new("work".into(), "evt-1"),
                &EventDetails::new("Intro call"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdapterErrorCode::ProvisionalHoldFailed);
        assert!(err.message().contains("expired"));
    }

    #[tokio::test]
    async fn confirm_missing_hold_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events/evt-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        let err = adapter
            .confirm_provisional_hold(
                &ProvisionalHoldId::new("work".into(), "evt-1"),
                &EventDetails::new("Intro call"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdapterErrorCode::ProvisionalHoldFailed);
    }

    #[tokio::test]
    async fn release_tolerates_missing_event() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/calendars/primary/events/evt-1"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        adapter
            .release_provisional_hold(&ProvisionalHoldId::new("work".into(), "evt-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscribe_opens_watch_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events/watch"))
            .and(body_partial_json(serde_json::json!({
                "type": "web_hook",
                "address": "https://hooks.example.com/google"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "api#channel",
                "id": "chan-1",
                "resourceId": "res-1",
                "expiration": "1740819600000"
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server, "good").await;
        let sub = adapter
            .subscribe_to_webhook("https://hooks.example.com/google")
            .await
            .unwrap();
        assert_eq!(sub.channel_id, "chan-1");
        assert_eq!(sub.resource_id, "res-1");
        assert_eq!(sub.expires_at, Some(utc(9, 0)));
    }

    #[tokio::test]
    async fn expired_credentials_are_refreshed_on_initialize() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "fresh").await;

        let adapter = GoogleAdapter::new("work", config(&server)).unwrap();
        adapter
            .initialize(CredentialBundle::new(
                "old",
                Some("refresh".to_string()),
                Some(Utc::now() - Duration::hours(1)),
            ))
            .await
            .unwrap();
        assert!(adapter.is_authenticated());
        assert_eq!(adapter.token_storage.access_token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn expired_credentials_without_refresh_token_are_rejected() {
        let server = MockServer::start().await;
        let adapter = GoogleAdapter::new("work", config(&server)).unwrap();
        let err = adapter
            .initialize(CredentialBundle::new("old", None, Some(Utc::now() - Duration::hours(1))))
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }
}

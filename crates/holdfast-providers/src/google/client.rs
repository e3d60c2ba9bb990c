//! Google Calendar API client.
//!
//! This module provides a low-level HTTP client for the Calendar API v3
//! endpoints the adapter needs: `freeBusy`, event CRUD, `events.watch` and
//! `channels.stop`. The access token is supplied per call so the adapter can
//! swap it after a refresh without rebuilding the client.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use holdfast_core::{Attendee, CalendarEvent, EventStatus, ResponseStatus, TimeWindow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AdapterError, AdapterResult};

use super::config::GoogleConfig;

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GoogleCalendarClient {
    /// Creates a new client for the configured API host.
    pub fn new(config: &GoogleConfig) -> AdapterResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                AdapterError::configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            base_url: config.api_base_url.clone(),
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    /// Queries busy intervals of one calendar over a window.
    pub async fn free_busy(
        &self,
        token: &str,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> AdapterResult<Vec<TimeWindow>> {
        let body = FreeBusyRequest {
            time_min: window.start.to_rfc3339(),
            time_max: window.end.to_rfc3339(),
            items: vec![FreeBusyItem {
                id: calendar_id.to_string(),
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let response: FreeBusyResponse = parse_json(check_status(response).await?).await?;
        let Some(calendar) = response.calendars.get(calendar_id) else {
            return Err(AdapterError::invalid_response(format!(
                "freeBusy response has no entry for calendar {}",
                calendar_id
            )));
        };

        if let Some(error) = calendar.errors.first() {
            return Err(AdapterError::server(format!(
                "freeBusy reported {} for calendar {}",
                error.reason, calendar_id
            )));
        }

        let mut busy = Vec::with_capacity(calendar.busy.len());
        for period in &calendar.busy {
            let start = parse_timestamp(&period.start)?;
            let end = parse_timestamp(&period.end)?;
            match TimeWindow::checked(start, end) {
                Some(window) => busy.push(window),
                None => warn!(calendar_id, "skipping inverted busy period"),
            }
        }

        debug!("fetched {} busy periods from calendar {}", busy.len(), calendar_id);
        Ok(busy)
    }

    /// Creates an event.
    pub async fn insert_event(
        &self,
        token: &str,
        calendar_id: &str,
        event: &EventWrite,
    ) -> AdapterResult<ApiEvent> {
        let mut request = self
            .http_client
            .post(self.events_url(calendar_id))
            .bearer_auth(token)
            .json(event);
        if event.conference_data.is_some() {
            request = request.query(&[("conferenceDataVersion", "1")]);
        }
        if event.attendees.as_ref().is_some_and(|a| !a.is_empty()) {
            request = request.query(&[("sendUpdates", "all")]);
        }

        let response = request.send().await.map_err(map_send_error)?;
        parse_json(check_status(response).await?).await
    }

    /// Fetches an event.
    pub async fn get_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> AdapterResult<ApiEvent> {
        let response = self
            .http_client
            .get(self.event_url(calendar_id, event_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_send_error)?;
        parse_json(check_status(response).await?).await
    }

    /// Partially updates an event and notifies attendees.
    pub async fn patch_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventWrite,
    ) -> AdapterResult<ApiEvent> {
        let mut request = self
            .http_client
            .patch(self.event_url(calendar_id, event_id))
            .bearer_auth(token)
            .query(&[("sendUpdates", "all")])
            .json(event);
        if event.conference_data.is_some() {
            request = request.query(&[("conferenceDataVersion", "1")]);
        }

        let response = request.send().await.map_err(map_send_error)?;
        parse_json(check_status(response).await?).await
    }

    /// Deletes an event.
    ///
    /// A missing event (404 or 410) is reported as `NotFound`.
    pub async fn delete_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> AdapterResult<()> {
        let response = self
            .http_client
            .delete(self.event_url(calendar_id, event_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await?;
        Ok(())
    }

    /// Opens a push-notification channel on the calendar's events.
    pub async fn watch(
        &self,
        token: &str,
        calendar_id: &str,
        channel_id: &str,
        address: &str,
    ) -> AdapterResult<ApiChannel> {
        let body = WatchRequest {
            id: channel_id.to_string(),
            kind: "web_hook".to_string(),
            address: address.to_string(),
        };
        let response = self
            .http_client
            .post(format!("{}/watch", self.events_url(calendar_id)))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        parse_json(check_status(response).await?).await
    }

    /// Stops a push-notification channel.
    pub async fn stop_channel(
        &self,
        token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> AdapterResult<()> {
        let body = StopRequest {
            id: channel_id.to_string(),
            resource_id: resource_id.to_string(),
        };
        let response = self
            .http_client
            .post(format!("{}/channels/stop", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await?;
        Ok(())
    }
}

fn map_send_error(e: reqwest::Error) -> AdapterError {
    let err = if e.is_timeout() {
        AdapterError::network("request timeout")
    } else if e.is_connect() {
        AdapterError::network(format!("connection failed: {}", e))
    } else {
        AdapterError::network(format!("request failed: {}", e))
    };
    err.with_source(e)
}

/// Maps non-success statuses onto error codes.
async fn check_status(response: reqwest::Response) -> AdapterResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(AdapterError::rate_limited(format!(
            "rate limit exceeded{}",
            retry_after
                .map(|s| format!(", retry after {} seconds", s))
                .unwrap_or_default()
        )));
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AdapterError::authentication("access token expired or invalid"));
    }

    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        return Err(AdapterError::not_found(format!("resource not found ({})", status)));
    }

    let body = response.text().await.unwrap_or_default();

    // Google reports per-user quota exhaustion as 403
    if status == reqwest::StatusCode::FORBIDDEN {
        if body.contains("rateLimitExceeded") || body.contains("quotaExceeded") {
            return Err(AdapterError::rate_limited(format!("quota exceeded: {}", body)));
        }
        return Err(AdapterError::configuration(format!(
            "access denied to calendar: {}",
            body
        )));
    }

    if status.is_server_error() {
        return Err(AdapterError::server(format!("API error ({}): {}", status, body)));
    }

    Err(AdapterError::invalid_response(format!(
        "request rejected ({}): {}",
        status, body
    )))
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> AdapterResult<T> {
    let body = response.text().await.map_err(|e| {
        AdapterError::network(format!("failed to read response: {}", e)).with_source(e)
    })?;
    serde_json::from_str(&body).map_err(|e| {
        AdapterError::invalid_response(format!("failed to parse response: {}", e)).with_source(e)
    })
}

fn parse_timestamp(value: &str) -> AdapterResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AdapterError::invalid_response(format!("invalid timestamp {:?}: {}", value, e)))
}

/// Request body for `freeBusy`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest {
    time_min: String,
    time_max: String,
    items: Vec<FreeBusyItem>,
}

#[derive(Debug, Serialize)]
struct FreeBusyItem {
    id: String,
}

/// Response from `freeBusy`.
#[derive(Debug, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: BTreeMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<FreeBusyPeriod>,
    #[serde(default)]
    errors: Vec<FreeBusyError>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyPeriod {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct FreeBusyError {
    reason: String,
}

/// Request body for `events.watch`.
#[derive(Debug, Serialize)]
struct WatchRequest {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

/// Request body for `channels.stop`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest {
    id: String,
    resource_id: String,
}

/// A notification channel as returned by `events.watch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiChannel {
    /// Channel identifier (echo of the requested id).
    pub id: String,
    /// Opaque identifier of the watched resource.
    pub resource_id: String,
    /// Expiration as milliseconds since the epoch, encoded as a string.
    pub expiration: Option<String>,
}

impl ApiChannel {
    /// Returns the channel expiry, if reported.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
    }
}

/// A single event from the Google Calendar API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: ApiEventTime,
    pub end: ApiEventTime,
    pub html_link: Option<String>,
    pub hangout_link: Option<String>,
    pub attendees: Option<Vec<ApiAttendee>>,
    pub conference_data: Option<ApiConferenceData>,
    pub extended_properties: Option<ApiExtendedProperties>,
}

/// Event time from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    pub date: Option<String>,
    pub date_time: Option<String>,
}

impl ApiEventTime {
    fn to_utc(&self) -> AdapterResult<DateTime<Utc>> {
        match (&self.date_time, &self.date) {
            (Some(dt), _) => parse_timestamp(dt),
            (None, Some(date)) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
                .map_err(|e| AdapterError::invalid_response(format!("invalid date {:?}: {}", date, e))),
            (None, None) => Err(AdapterError::invalid_response("event time has neither date nor dateTime")),
        }
    }
}

/// Attendee from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAttendee {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub response_status: Option<String>,
}

/// Conference data from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConferenceData {
    pub entry_points: Option<Vec<ApiEntryPoint>>,
}

/// Entry point from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEntryPoint {
    pub entry_point_type: String,
    pub uri: Option<String>,
}

/// Extended properties from the API.
#[derive(Debug, Default, Deserialize)]
pub struct ApiExtendedProperties {
    #[serde(default)]
    pub private: BTreeMap<String, String>,
}

impl ApiEvent {
    /// Returns a private extended property.
    pub fn private_property(&self, key: &str) -> Option<&str> {
        self.extended_properties
            .as_ref()
            .and_then(|p| p.private.get(key))
            .map(String::as_str)
    }

    /// Converts the API event into the provider-agnostic model.
    pub fn into_calendar_event(self, account_id: &str, calendar_id: &str) -> AdapterResult<CalendarEvent> {
        let start = self.start.to_utc()?;
        let end = self.end.to_utc()?;

        let meeting_link = self.hangout_link.or_else(|| {
            self.conference_data
                .and_then(|cd| cd.entry_points)
                .unwrap_or_default()
                .into_iter()
                .find(|ep| ep.entry_point_type == "video")
                .and_then(|ep| ep.uri)
        });

        let attendees = self
            .attendees
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| {
                Some(Attendee {
                    email: a.email?,
                    display_name: a.display_name,
                    response_status: ResponseStatus::from_api(a.response_status.as_deref()),
                })
            })
            .collect();

        Ok(CalendarEvent {
            id: self.id,
            account_id: account_id.to_string(),
            calendar_id: calendar_id.to_string(),
            summary: self.summary.unwrap_or_default(),
            description: self.description,
            location: self.location,
            start,
            end,
            status: EventStatus::from_api(self.status.as_deref()),
            attendees,
            meeting_link,
            html_link: self.html_link,
        })
    }
}

/// Writable event fields, for insert and patch.
///
/// Unset fields are omitted so a patch leaves them untouched.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventTimeWrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventTimeWrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<AttendeeWrite>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<ExtendedPropertiesWrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conference_data: Option<ConferenceDataWrite>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTimeWrite {
    pub date_time: String,
}

impl From<DateTime<Utc>> for EventTimeWrite {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            date_time: value.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeWrite {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl From<&Attendee> for AttendeeWrite {
    fn from(value: &Attendee) -> Self {
        Self {
            email: value.email.clone(),
            display_name: value.display_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExtendedPropertiesWrite {
    pub private: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceDataWrite {
    pub create_request: ConferenceCreateRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceCreateRequest {
    pub request_id: String,
    pub conference_solution_key: ConferenceSolutionKey,
}

#[derive(Debug, Serialize)]
pub struct ConferenceSolutionKey {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ConferenceDataWrite {
    /// Requests a Google Meet link.
    pub fn meet(request_id: impl Into<String>) -> Self {
        Self {
            create_request: ConferenceCreateRequest {
                request_id: request_id.into(),
                conference_solution_key: ConferenceSolutionKey {
                    kind: "hangoutsMeet".to_string(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_event_with_conference_and_properties() {
        let json = r#"{
            "id": "event1",
            "summary": "Hold",
            "status": "tentative",
            "start": {"dateTime": "2025-03-01T09:00:00Z"},
            "end": {"dateTime": "2025-03-01T10:00:00+00:00"},
            "conferenceData": {
                "entryPoints": [
                    {"entryPointType": "phone", "uri": "tel:+1-555"},
                    {"entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij"}
                ]
            },
            "extendedProperties": {"private": {"holdfastHold": "1", "holdfastRequestId": "req-1"}},
            "attendees": [
                {"email": "a@example.com", "responseStatus": "accepted"},
                {"displayName": "no email"}
            ]
        }"#;

        let event: ApiEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.private_property("holdfastRequestId"), Some("req-1"));
        assert_eq!(event.private_property("missing"), None);

        let event = event.into_calendar_event("acct", "primary").unwrap();
        assert_eq!(event.status, EventStatus::Tentative);
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        assert_eq!(event.meeting_link.as_deref(), Some("https://meet.google.com/abc-defg-hij"));
        assert_eq!(event.attendees.len(), 1);
        assert_eq!(event.attendees[0].response_status, ResponseStatus::Accepted);
    }

    #[test]
    fn parse_all_day_event() {
        let json = r#"{
            "id": "event1",
            "start": {"date": "2025-03-01"},
            "end": {"date": "2025-03-02"}
        }"#;
        let event: ApiEvent = serde_json::from_str(json).unwrap();
        let event = event.into_calendar_event("acct", "primary").unwrap();
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(event.end, Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());
        assert_eq!(event.status, EventStatus::Confirmed);
    }

    #[test]
    fn event_write_omits_unset_fields() {
        let write = EventWrite {
            status: Some("confirmed".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json, serde_json::json!({"status": "confirmed"}));
    }

    #[test]
    fn conference_request_shape() {
        let json = serde_json::to_value(ConferenceDataWrite::meet("r-1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "createRequest": {
                    "requestId": "r-1",
                    "conferenceSolutionKey": {"type": "hangoutsMeet"}
                }
            })
        );
    }

    #[test]
    fn channel_expiration_parsing() {
        let channel = ApiChannel {
            id: "c".to_string(),
            resource_id: "r".to_string(),
            expiration: Some("1740819600000".to_string()),
        };
        assert_eq!(
            channel.expires_at(),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
        );
    }
}

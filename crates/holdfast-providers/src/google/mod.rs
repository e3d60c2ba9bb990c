//! Google Calendar adapter implementation.
//!
//! This module provides a [`GoogleAdapter`] that implements the full
//! [`CalendarAdapter`](crate::CalendarAdapter) contract against the Google
//! Calendar API v3.
//!
//! # Features
//!
//! - Availability from `freeBusy`
//! - Provisional holds as tentative private events tagged in
//!   `extendedProperties.private`
//! - Confirmation by `PATCH` with attendee notification and optional Meet link
//! - Push notifications through `events.watch` / `channels.stop`
//! - Proactive and on-401 token refresh, with optional token persistence
//!
//! # Example
//!
//! ```ignore
//! use holdfast_providers::google::{GoogleAdapter, GoogleConfig, OAuthCredentials};
//!
//! let credentials = OAuthCredentials::new(
//!     "your-client-id.apps.googleusercontent.com",
//!     "your-client-secret",
//! );
//!
//! let adapter = GoogleAdapter::new("work", GoogleConfig::new(credentials))?;
//! adapter.initialize(account.credentials.clone()).await?;
//!
//! let slots = adapter.get_availability(&query).await?;
//! ```

mod adapter;
mod client;
mod config;
mod oauth;
mod tokens;

pub use adapter::{EXPIRES_AT_KEY, GoogleAdapter, HOLD_MARKER_KEY, REQUEST_ID_KEY};
pub use config::{GoogleConfig, OAuthCredentials};
pub use oauth::OAuthClient;
pub use tokens::TokenStorage;

//! CalendarAdapter trait and implementations.
//!
//! This crate provides the abstraction layer for calendar backends:
//!
//! - [`CalendarAdapter`] - The uniform capability set every connected
//!   calendar account is normalized into
//! - [`AdapterError`] - Error taxonomy for adapter operations
//! - [`with_auth_retry`] - Refresh-then-retry-once wrapper for expired credentials
//! - [`MemoryAdapter`] - Deterministic in-process calendar
//! - [`google::GoogleAdapter`] - Google Calendar API v3 (feature `google`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │  Google API     │    │   In-process    │
//! └────────┬────────┘    └────────┬────────┘
//!          │                      │
//!          ▼                      ▼
//! ┌─────────────────┐    ┌─────────────────┐
//! │  GoogleAdapter  │    │  MemoryAdapter  │
//! └────────┬────────┘    └────────┬────────┘
//!          │                      │
//!          │   CalendarAdapter    │
//!          └──────────┬───────────┘
//!                     │
//!                     ▼
//!        TimeSlot grid / ProvisionalHold
//! ```

pub mod adapter;
pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod memory;
pub mod retry;

// Re-export main types at crate root
pub use adapter::{
    AvailabilityQuery, BoxFuture, CalendarAdapter, DEFAULT_HOLD_TTL_MINUTES,
    DEFAULT_SLOT_INTERVAL_MINUTES, ProvisionalHold, ProvisionalHoldId, ResourceState,
    WebhookSubscription,
};
pub use error::{AdapterError, AdapterErrorCode, AdapterResult};
pub use memory::MemoryAdapter;
pub use retry::with_auth_retry;

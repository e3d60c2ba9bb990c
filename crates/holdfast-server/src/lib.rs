//! Orchestrator: aggregation, holds, sweeper, webhooks.
//!
//! This crate provides the holdfast orchestrator and its daemon:
//! - Availability aggregation across every connected calendar, with a
//!   short-TTL cache and business exclusion rules
//! - All-or-nothing provisional holds with compensating rollback
//! - Expiry sweeping of abandoned holds
//! - Cache invalidation from provider push notifications
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use holdfast_core::TimeWindow;
//! use holdfast_providers::MemoryAdapter;
//! use holdfast_server::{AdapterRegistry, MemoryStore, Orchestrator, OrchestratorOptions};
//!
//! # async fn example(window: TimeWindow) -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = AdapterRegistry::default();
//! registry.register(Arc::new(MemoryAdapter::authenticated("work")), 0);
//!
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::new(OrchestratorOptions::new("acme"), registry, store);
//!
//! let available = orchestrator.get_available_slots(window, 60, 5, None, None).await?;
//! if let Some(slot) = available.slots.first() {
//!     let hold = orchestrator.create_provisional_holds("request-1", slot, None).await?;
//!     orchestrator.release_provisional_holds(&hold.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod cache;
mod config;
mod coordinator;
pub mod daemon;
mod error;
mod hold;
mod orchestrator;
mod registry;
mod scheduler;
mod secret;
mod store;
mod webhook;

pub use aggregator::{
    AvailabilityAggregator, AvailabilityResult, DEFAULT_ADAPTER_TIMEOUT, SlotRequest, intersect_all,
    intersect_pair,
};
pub use cache::{AvailabilityCache, CacheEntry, DEFAULT_CACHE_TTL, SharedCache, new_shared_cache};
pub use config::{
    AvailabilitySettings, GoogleSettings, HoldSettings, LoggingSettings, OrchestratorConfig,
    WebhookSettings,
};
pub use coordinator::{HoldCoordinator, MAX_HOLD_TTL_DAYS};
pub use error::{
    AdapterFailure, ConfigError, OrchestratorError, OrchestratorResult, RollbackReport, StoreError,
    StoreResult,
};
pub use hold::{AggregateHold, HoldId, HoldState, HoldTransition};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use registry::{
    AdapterFactory, AdapterRegistry, DEFAULT_MAX_ACCOUNTS, ProviderFactory, bounded,
};
pub use scheduler::{
    Scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle, SchedulerState,
    SharedSchedulerState, new_scheduler_state,
};
pub use secret::resolve as resolve_secret;
pub use store::{AccountStore, ExclusionStore, FileStore, HoldStore, MemoryStore, StoreData};
pub use webhook::WebhookHandler;

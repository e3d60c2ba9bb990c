//! Availability cache with TTL (Time-To-Live) support.
//!
//! Aggregated availability is memoized per query for a short TTL. Any hold
//! state change or webhook notification clears the whole cache rather than
//! patching entries in place.
//!
//! Each clear bumps a generation counter. A fan-out started before a clear
//! must not repopulate the cache with its (possibly stale) result, so inserts
//! carry the generation observed when the computation began.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use holdfast_core::TimeSlot;
use holdfast_providers::AvailabilityQuery;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Reference TTL for aggregated availability.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Cache entry containing slots and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Filtered, intersected slots.
    pub slots: Vec<TimeSlot>,
    /// When the entry was computed.
    pub updated_at: DateTime<Utc>,
    /// When the entry expires (monotonic clock).
    expires_at: Instant,
}

impl CacheEntry {
    /// Creates a new cache entry with the given TTL.
    pub fn new(slots: Vec<TimeSlot>, ttl: Duration) -> Self {
        Self {
            slots,
            updated_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    /// Returns true if the entry has expired.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Returns the time until expiration.
    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Aggregated availability keyed by query parameters.
#[derive(Debug)]
pub struct AvailabilityCache {
    ttl: Duration,
    generation: u64,
    entries: HashMap<AvailabilityQuery, CacheEntry>,
}

impl Default for AvailabilityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl AvailabilityCache {
    /// Creates a new cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            generation: 0,
            entries: HashMap::new(),
        }
    }

    /// Returns the TTL applied to new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Gets the slots for a query, only if not expired.
    pub fn get_valid(&self, query: &AvailabilityQuery) -> Option<&CacheEntry> {
        let entry = self.entries.get(query).filter(|entry| !entry.is_expired());
        if entry.is_some() {
            trace!(window_start = %query.window.start, "Availability cache hit");
        }
        entry
    }

    /// Inserts an entry unconditionally. Expired entries are evicted first.
    pub fn insert(&mut self, query: AvailabilityQuery, slots: Vec<TimeSlot>) {
        self.evict_expired();
        debug!(window_start = %query.window.start, slots = slots.len(), "Cached availability");
        self.entries.insert(query, CacheEntry::new(slots, self.ttl));
    }

    /// Inserts an entry only if no clear happened since `generation`.
    ///
    /// Returns true if the entry was stored.
    pub fn insert_if_current(
        &mut self,
        generation: u64,
        query: AvailabilityQuery,
        slots: Vec<TimeSlot>,
    ) -> bool {
        if generation != self.generation {
            debug!(
                observed = generation,
                current = self.generation,
                "Discarding availability computed before invalidation"
            );
            return false;
        }
        self.insert(query, slots);
        true
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        self.generation = self.generation.wrapping_add(1);
        debug!(count = count, generation = self.generation, "Cleared availability cache");
    }

    /// Removes all expired entries.
    pub fn evict_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted expired cache entries");
        }
        evicted
    }

    /// Returns the number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache shared between the aggregator, the coordinator and the webhook handler.
pub type SharedCache = Arc<RwLock<AvailabilityCache>>;

/// Creates a new shared cache.
pub fn new_shared_cache(ttl: Duration) -> SharedCache {
    Arc::new(RwLock::new(AvailabilityCache::new(ttl)))
}

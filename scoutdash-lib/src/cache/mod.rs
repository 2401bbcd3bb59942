//! Time-classed in-memory cache
//!
//! Entries are tagged with a [`FreshnessClass`] at write time. The
//! [`FetchCoordinator`] is the only read/write path into the [`EntryStore`]:
//! it serves fresh hits, deduplicates concurrent refreshes and degrades to the
//! previous value when a refresh fails.

mod clock;
mod config;
mod coordinator;
mod store;

pub use clock::*;
pub use config::*;
pub use coordinator::*;
pub use store::*;

use std::time::Duration;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A named TTL tier attached to a cache key at write time.
///
/// Ordered from longest to shortest TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreshnessClass {
    /// Rarely changing data (team lists, season schedules). 1 hour.
    Static,
    /// Data that changes a few times per event (rankings). 5 minutes.
    SemiStatic,
    /// Data that changes while matches are played. 60 seconds.
    Live,
}

impl FreshnessClass {
    /// Returns the time-to-live for this class.
    pub const fn ttl(self) -> Duration {
        match self {
            Self::Static => Duration::from_secs(60 * 60),
            Self::SemiStatic => Duration::from_secs(5 * 60),
            Self::Live => Duration::from_secs(60),
        }
    }

    fn ttl_delta(self) -> TimeDelta {
        TimeDelta::from_std(self.ttl()).unwrap_or(TimeDelta::MAX)
    }
}

/// One cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached payload. Never inspected by the cache.
    pub data: T,
    /// When the producer last returned a value for this key.
    pub stored_at: DateTime<Utc>,
    /// TTL tier this entry was written with.
    pub freshness_class: FreshnessClass,
    /// Most recent read, used only for eviction ranking.
    pub last_accessed_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Creates an entry written at `now`.
    pub fn new(data: T, freshness_class: FreshnessClass, now: DateTime<Utc>) -> Self {
        Self {
            data,
            stored_at: now,
            freshness_class,
            last_accessed_at: now,
        }
    }

    /// Returns `true` while `now - stored_at` is strictly below the class TTL.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.stored_at) < self.freshness_class.ttl_delta()
    }

    /// Returns how long ago this entry was stored, or zero for a future timestamp.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Records a read at `now`.
    ///
    /// Access time never moves backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }
}

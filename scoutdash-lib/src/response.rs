//! Response envelope with cache metadata

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::cache::FreshnessClass;

/// A payload together with the cache metadata it was served with.
///
/// The server-side [`FetchCoordinator`](crate::cache::FetchCoordinator)
/// produces it and route handlers forward it verbatim; the client-side
/// [`RetryGateway`](crate::gateway::RetryGateway) decodes the same shape.
///
/// Serialized as `{ "data": ..., "meta": { "lastRefresh", "stale", "freshnessClass" } }`.
///
/// # Example
///
/// ```ignore
/// let response = coordinator.get_or_fetch("tba:team:254", FreshnessClass::Static, producer).await?;
///
/// if response.is_stale() {
///     println!("upstream down, serving data from {}", response.last_refresh());
/// }
///
/// let team = response.into_inner();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    data: T,
    /// How fresh the data is and where it came from.
    pub meta: ResponseMeta,
}

/// Cache metadata attached to every [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    /// When the returned data was stored, never the time it was served.
    pub last_refresh: DateTime<Utc>,
    /// `true` when the data is a fallback for a failed refresh.
    pub stale: bool,
    /// TTL tier of the returned entry.
    pub freshness_class: FreshnessClass,
}

impl<T> Response<T> {
    /// Creates a response from its parts.
    pub fn new(data: T, meta: ResponseMeta) -> Self {
        Self { data, meta }
    }

    /// Creates a response for data that is within its TTL.
    pub fn fresh(data: T, stored_at: DateTime<Utc>, freshness_class: FreshnessClass) -> Self {
        Self::new(
            data,
            ResponseMeta {
                last_refresh: stored_at,
                stale: false,
                freshness_class,
            },
        )
    }

    /// Creates a degraded response served because a refresh failed.
    pub fn stale(data: T, stored_at: DateTime<Utc>, freshness_class: FreshnessClass) -> Self {
        Self::new(
            data,
            ResponseMeta {
                last_refresh: stored_at,
                stale: true,
                freshness_class,
            },
        )
    }

    /// Returns `true` if this is a degraded fallback.
    pub fn is_stale(&self) -> bool {
        self.meta.stale
    }

    /// Returns when the data was stored.
    pub fn last_refresh(&self) -> DateTime<Utc> {
        self.meta.last_refresh
    }

    /// Returns the TTL tier of the data.
    pub fn freshness_class(&self) -> FreshnessClass {
        self.meta.freshness_class
    }

    /// Returns a reference to the inner data.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Consumes the response and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Consumes the response and returns data and metadata.
    pub fn into_parts(self) -> (T, ResponseMeta) {
        (self.data, self.meta)
    }

    /// Maps the inner data using the provided function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Response<U> {
        Response {
            data: f(self.data),
            meta: self.meta,
        }
    }

    /// Maps the inner data with a fallible function.
    pub fn try_map<U, E, F: FnOnce(T) -> Result<U, E>>(self, f: F) -> Result<Response<U>, E> {
        Ok(Response {
            data: f(self.data)?,
            meta: self.meta,
        })
    }
}

//! Cache configuration

/// Configuration for the in-memory entry store.
///
/// TTLs are fixed per [`FreshnessClass`](super::FreshnessClass); only the
/// store's size bound is configurable.
///
/// # Example
///
/// ```
/// use scoutdash_lib::cache::CacheConfig;
///
/// let config = CacheConfig::default().with_max_entries(1000);
/// assert_eq!(config.max_entries, 1000);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries kept after any insertion.
    ///
    /// Default: 500
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 500 }
    }
}

impl CacheConfig {
    /// Creates a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of entries.
    ///
    /// Values below 1 are raised to 1.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

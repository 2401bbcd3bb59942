//! Retry configuration and backpressure signals.

mod backpressure;
mod config;

pub use backpressure::parse_delay;
pub use backpressure::parse_delay_at;
pub use config::RetryConfig;

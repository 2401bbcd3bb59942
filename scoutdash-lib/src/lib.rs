//! Request-resilience pipeline for the scouting dashboard
//!
//! The server side wraps upstream sports-data calls in a time-classed cache
//! ([`cache::FetchCoordinator`]) that coalesces concurrent refreshes, bounds
//! its size and serves the last good value when a refresh fails. The client
//! side ([`gateway::RetryGateway`]) retries rate-limited and unavailable
//! responses, honoring `Retry-After`, and coalesces and cancels requests.

pub mod cache;
pub mod error;
pub mod flight;
pub mod gateway;
pub mod response;
pub mod retry;

pub use response::Response;
pub use response::ResponseMeta;

//! Error types

mod gateway;

pub use gateway::*;

//! Background Tasks Module
//!
//! Timer-driven work that runs alongside a started connection.
//!
//! # Tasks
//! - Expiry: one timer per live key, removing the key when its TTL elapses
//! - Persistence: debounced full rewrites of the cache file

pub mod expiry;
pub mod persist;

pub use expiry::ExpiryScheduler;
pub use persist::{FileHandle, Persistence, SaveFailure};

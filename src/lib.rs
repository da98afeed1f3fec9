//! Slidewin - sliding-window metrics engine
//!
//! This crate implements a rotating ring of time buckets that pluggable
//! metrics (a running counter and a per-slice admission gate) use to
//! accumulate values over a moving time window with bounded memory.

pub mod config;
pub mod error;
pub mod logging;
pub mod window;

pub use error::{Result, WindowError};
pub use window::{Counter, Metric, RateLimiter, RollingWindow};

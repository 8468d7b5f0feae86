//! # Utility Modules
//!
//! Supporting utilities shared by the engine.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup (plain or JSON)
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Wall-clock formatting for status messages

pub mod logging;
pub mod metrics;
pub mod time;

pub use metrics::{Metrics, MetricsSnapshot};

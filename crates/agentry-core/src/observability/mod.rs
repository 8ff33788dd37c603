//! Observability: structured event logging and scoped metric guards.
//!
//! The logger and metrics recorder are plain values owned by the agent process
//! and handed to components as `Arc`s. Nothing here installs process-global state.

pub mod event;
pub mod guards;
pub mod logger;

pub use self::event::{FailureContext, LogEvent, LogRecord, Severity};
pub use self::guards::{ActiveTaskGuard, LatencyTimer};
pub use self::logger::EventLogger;

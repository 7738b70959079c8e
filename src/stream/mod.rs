//! Stream and log rate limiting

pub mod throttle;

pub use throttle::{LogThrottle, Throttle, ThrottleExt};

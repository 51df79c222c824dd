//! Stream combinators for rate-limiting frame consumers.

mod throttle;

pub use throttle::{Throttle, ThrottleExt};

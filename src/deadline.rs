//! A single deadline primitive, replacing the ad-hoc `timeval_ms`
//! comparisons of the original driver (`spec.md` §9 "Timeouts everywhere").

use std::time::{Duration, Instant};

/// A point in time a bounded poll loop must not run past.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

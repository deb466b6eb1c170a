//! Wall-clock sources.
//!
//! Session expiry is stored as absolute epoch milliseconds, so every reader
//! needs "now" on the same scale. [`SystemClock`] reads the real wall clock
//! and keeps counting across process suspension. [`InstantClock`] advances
//! with tokio's clock, which lets paused-time tests drive expiry and timers
//! together.

use chrono::{DateTime, NaiveDate, Utc};

/// A source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// The current UTC calendar date.
    fn today(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.now_millis())
            .unwrap_or_default()
            .date_naive()
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock anchored at a fixed epoch time that advances with
/// `tokio::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct InstantClock {
    anchor_millis: i64,
    anchor: tokio::time::Instant,
}

impl InstantClock {
    /// Start the clock at `anchor_millis` as of now.
    #[must_use]
    pub fn starting_at(anchor_millis: i64) -> Self {
        Self {
            anchor_millis,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Clock for InstantClock {
    fn now_millis(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.anchor_millis.saturating_add(elapsed)
    }
}

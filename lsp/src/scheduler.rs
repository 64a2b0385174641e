//! Adaptive poll schedule for driving [`LanguageServer::pump`].
//!
//! The host's event loop asks the schedule whether a pump is due. The period
//! starts short after outbound traffic and grows linearly to a ceiling while
//! the connection is quiet.
//!
//! [`LanguageServer::pump`]: crate::LanguageServer::pump

use std::time::{Duration, Instant};

/// Linear backoff between pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStrategy {
    pub min: Duration,
    pub max: Duration,
    pub step: Duration,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(10),
            max: Duration::from_millis(250),
            step: Duration::from_millis(10),
        }
    }
}

impl BackoffStrategy {
    #[must_use]
    pub fn next(&self, current: Duration) -> Duration {
        (current + self.step).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct PollSchedule {
    strategy: BackoffStrategy,
    period: Duration,
    next_due: Option<Instant>,
}

impl PollSchedule {
    /// A stopped schedule.
    #[must_use]
    pub fn new(strategy: BackoffStrategy) -> Self {
        Self {
            strategy,
            period: strategy.min,
            next_due: None,
        }
    }

    /// Start (or restart) polling at the shortest period.
    pub fn restart(&mut self, now: Instant) {
        self.period = self.strategy.min;
        self.next_due = Some(now + self.period);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    /// Record that a pump ran at `now` and schedule the next one.
    pub fn fired(&mut self, now: Instant) {
        if self.next_due.is_none() {
            return;
        }
        self.period = self.strategy.next(self.period);
        self.next_due = Some(now + self.period);
    }
}

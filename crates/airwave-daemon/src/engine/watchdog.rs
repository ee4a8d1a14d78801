use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Rebuild the source; `attempt` counts from 1.
    Recover { attempt: u32 },
    /// Cap reached: give up and surface an error.
    Exhausted,
}

/// Heartbeat clock plus the bounded recovery counter.
#[derive(Debug)]
pub struct StallWatchdog {
    last_heartbeat: Option<Instant>,
    recoveries: u32,
    max_recoveries: u32,
    threshold: Duration,
}

impl StallWatchdog {
    pub fn new(threshold: Duration, max_recoveries: u32) -> Self {
        Self {
            last_heartbeat: None,
            recoveries: 0,
            max_recoveries,
            threshold,
        }
    }

    /// Start timing from `now`; called on entering PLAYING.
    pub fn arm(&mut self, now: Instant) {
        self.last_heartbeat = Some(now);
    }

    /// Stop timing (left PLAYING).  The counter survives a pause so a
    /// flapping stream cannot reset it by toggling.
    pub fn disarm(&mut self) {
        self.last_heartbeat = None;
    }

    pub fn is_armed(&self) -> bool {
        self.last_heartbeat.is_some()
    }

    /// Confirmed progress.  Returns true when this cleared a non-zero
    /// recovery count.
    pub fn heartbeat(&mut self, now: Instant) -> bool {
        self.last_heartbeat = Some(now);
        std::mem::take(&mut self.recoveries) > 0
    }

    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    pub fn reset(&mut self) {
        self.last_heartbeat = None;
        self.recoveries = 0;
    }

    /// Periodic check.  Only an armed watchdog whose gap exceeds the
    /// threshold acts.
    pub fn check(&mut self, now: Instant) -> Verdict {
        match self.last_heartbeat {
            Some(last) if now.saturating_duration_since(last) > self.threshold => {
                self.trigger(now)
            }
            _ => Verdict::Healthy,
        }
    }

    /// Explicit stall from the media layer, or an expired check.
    pub fn trigger(&mut self, now: Instant) -> Verdict {
        if self.recoveries >= self.max_recoveries {
            self.last_heartbeat = None;
            return Verdict::Exhausted;
        }
        self.recoveries += 1;
        // optimistic: the rebuilt source gets a full threshold to report in
        self.last_heartbeat = Some(now);
        Verdict::Recover {
            attempt: self.recoveries,
        }
    }
}

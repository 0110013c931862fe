use std::time::{Duration, Instant};

/// Rate limiter with trailing-edge coalescing.
///
/// The first call in a quiet period runs immediately. Calls that arrive
/// within `interval` of the last run are parked; only the latest arguments
/// are kept, and they become due once the interval has elapsed. At most one
/// deferred call is ever pending.
///
/// The caller owns the clock: `call` says whether to run now, `poll` hands
/// back the deferred arguments once `deadline` has passed.
#[derive(Debug, Clone)]
pub struct Throttle<A> {
    interval: Duration,
    last_run: Option<Instant>,
    pending: Option<A>,
}

impl<A> Throttle<A> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
            pending: None,
        }
    }

    /// Offer a call. Returns the arguments back if the call should run now.
    pub fn call(&mut self, now: Instant, args: A) -> Option<A> {
        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                self.pending = Some(args);
                None
            }
            _ => {
                // A newer call supersedes any parked arguments
                self.pending = None;
                self.last_run = Some(now);
                Some(args)
            }
        }
    }

    /// When the pending call becomes due, if there is one
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(self.last_run.map_or_else(Instant::now, |last| last + self.interval))
    }

    /// Take the pending call if it is due at `now`
    pub fn poll(&mut self, now: Instant) -> Option<A> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.last_run = Some(now);
        self.pending.take()
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

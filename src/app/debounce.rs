use tokio::time::{Duration, Instant};

/// Trailing-edge debounce as an explicit state machine.
///
/// Every [`schedule`](Debouncer::schedule) moves the deadline to
/// `now + window`; the owner fires once the deadline has passed. Time is
/// passed in rather than read, so the same machine serves a polling loop and
/// a timer task.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
    coalesced: u32,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            deadline: None,
            coalesced: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Arm or re-arm the timer
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
        self.coalesced += 1;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Number of triggers folded into the pending deadline
    pub fn coalesced(&self) -> u32 {
        self.coalesced
    }

    /// Disarm and return true if the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Disarm immediately; returns whether something was pending, in which
    /// case the caller must run the debounced action now.
    pub fn flush(&mut self) -> bool {
        let pending = self.deadline.is_some();
        self.reset();
        pending
    }

    /// Disarm without firing
    pub fn cancel(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.deadline = None;
        self.coalesced = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_edge() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));

        debouncer.schedule(start);
        debouncer.schedule(start + Duration::from_millis(200));
        assert_eq!(debouncer.coalesced(), 2);

        assert!(!debouncer.take_due(start + Duration::from_millis(400)));
        assert!(debouncer.take_due(start + Duration::from_millis(500)));
        assert!(!debouncer.is_pending());
        assert!(!debouncer.take_due(start + Duration::from_millis(900)));
    }

    #[test]
    fn test_flush_and_cancel() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));

        assert!(!debouncer.flush());

        debouncer.schedule(start);
        assert!(debouncer.flush());
        assert!(!debouncer.is_pending());

        debouncer.schedule(start);
        debouncer.cancel();
        assert!(!debouncer.take_due(start + Duration::from_secs(1)));
    }
}

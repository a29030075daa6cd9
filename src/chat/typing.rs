use std::time::{Duration, Instant};

/// Quiet period before a requested typing state is actually published.
pub const TYPING_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Trailing-edge debouncer for the outgoing typing signal.
///
/// Rapid requests collapse into the single most recent value; every new
/// request restarts the timer. The pending value fires through [`poll`],
/// which the app calls from its tick loop. There is no early flush; a
/// caller that wants to publish immediately cancels the pending request
/// and issues the write itself.
///
/// [`poll`]: TypingDebouncer::poll
#[derive(Debug)]
pub struct TypingDebouncer {
    quiet: Duration,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    value: bool,
    deadline: Instant,
}

impl TypingDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    /// Replace any pending value and restart the quiet-period timer.
    pub fn request(&mut self, value: bool, now: Instant) {
        self.pending = Some(Pending {
            value,
            deadline: now + self.quiet,
        });
    }

    /// Take the pending value once its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        if self.pending.as_ref()?.deadline <= now {
            self.pending.take().map(|pending| pending.value)
        } else {
            None
        }
    }

    /// Discard the pending value without publishing it.
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_QUIET_PERIOD)
    }
}

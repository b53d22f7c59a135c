use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window log. Invariant: `timestamps.len() <= max_requests`.
#[derive(Debug)]
pub(super) struct SlidingWindow {
    max_requests: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub(super) fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            timestamps: VecDeque::with_capacity(max_requests as usize),
        }
    }

    /// Drop timestamps that fell out of the trailing window.
    fn prune(&mut self, now: Instant) {
        let Some(window_start) = now.checked_sub(self.window) else {
            return;
        };
        while self.timestamps.front().is_some_and(|t| *t <= window_start) {
            self.timestamps.pop_front();
        }
    }

    pub(super) fn try_acquire(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.timestamps.len() < self.max_requests {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    pub(super) fn available(&mut self, now: Instant) -> u32 {
        self.prune(now);
        (self.max_requests - self.timestamps.len()) as u32
    }

    pub(super) fn time_until_available(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.timestamps.len() < self.max_requests {
            return Duration::ZERO;
        }
        self.timestamps
            .front()
            .map(|oldest| {
                oldest
                    .checked_add(self.window)
                    .map_or(Duration::MAX, |expiry| expiry.saturating_duration_since(now))
            })
            .unwrap_or(Duration::ZERO)
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub(super) fn reset(&mut self) {
        self.timestamps.clear();
    }
}

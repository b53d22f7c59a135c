use std::time::{Duration, Instant};

/// Token bucket state. Invariant: `0 <= tokens <= capacity`.
#[derive(Debug)]
pub(super) struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub(super) fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_rate,
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        // An `now` earlier than the last refill adds nothing.
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }

    pub(super) fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub(super) fn available(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }

    pub(super) fn time_until_available(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        // A tiny refill rate can push this past what `Duration` holds.
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate)
            .unwrap_or(Duration::MAX)
    }

    #[cfg(test)]
    pub(super) fn tokens(&self) -> f64 {
        self.tokens
    }

    pub(super) fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_drains_exactly_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(5, 1.0, start);

        let admitted = (0..10).filter(|_| bucket.try_acquire(start)).count();
        assert_eq!(admitted, 5);
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn refill_is_proportional_and_capped() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(4, 2.0, start);
        for _ in 0..4 {
            assert!(bucket.try_acquire(start));
        }

        // 2 tokens/s for 1s -> 2 tokens.
        let later = start + Duration::from_secs(1);
        assert_eq!(bucket.available(later), 2);

        // Long idle never overfills.
        let much_later = start + Duration::from_secs(3600);
        assert_eq!(bucket.available(much_later), 4);
        assert!(bucket.tokens() <= 4.0);
    }

    #[test]
    fn time_until_next_token() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1, 4.0, start);
        assert_eq!(bucket.time_until_available(start), Duration::ZERO);
        assert!(bucket.try_acquire(start));
        assert_eq!(bucket.time_until_available(start), Duration::from_millis(250));
    }

    #[test]
    fn tiny_refill_rate_saturates_wait_hint() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1, 1e-300, start);
        assert!(bucket.try_acquire(start));
        assert_eq!(bucket.time_until_available(start), Duration::MAX);
    }
}

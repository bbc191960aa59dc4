//! Global send pacing (§4.3): a minimum inter-send interval enforced across
//! every algorithm instance sharing the event loop, not per instance.
//!
//! The sender never blocks to pace; instead [`Pacer::poll`] tells the caller
//! how much longer to wait, and the probe is deferred into the timer wheel
//! for that long per §4.4's backpressure design.

use std::time::{Duration, Instant};

/// Parse a `min-inter-send` config value per §6's unit rule: values greater
/// than 10 are milliseconds, everything else is seconds.
#[must_use]
pub fn parse_min_inter_send(value: f64) -> Duration {
    if value > 10.0 {
        Duration::from_secs_f64(value / 1000.0)
    } else {
        Duration::from_secs_f64(value)
    }
}

/// Enforces a minimum interval between sends, shared globally across
/// algorithm instances.
pub struct Pacer {
    min_interval: Duration,
    last_send: Option<Instant>,
}

impl Pacer {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_send: None,
        }
    }

    /// Ask whether a send may proceed right now. Returns `Ok(())` if so,
    /// after which the caller must call [`Pacer::record_send`]; otherwise
    /// returns the remaining wait as `Err(Duration)`.
    pub fn poll(&self, now: Instant) -> Result<(), Duration> {
        match self.last_send {
            None => Ok(()),
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed >= self.min_interval {
                    Ok(())
                } else {
                    Err(self.min_interval - elapsed)
                }
            }
        }
    }

    pub fn record_send(&mut self, at: Instant) {
        self.last_send = Some(at);
    }

    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_at_or_below_ten() {
        assert_eq!(parse_min_inter_send(0.1), Duration::from_millis(100));
        assert_eq!(parse_min_inter_send(10.0), Duration::from_secs(10));
    }

    #[test]
    fn parses_milliseconds_above_ten() {
        assert_eq!(parse_min_inter_send(50.0), Duration::from_millis(50));
    }

    #[test]
    fn first_poll_always_allows_send() {
        let pacer = Pacer::new(Duration::from_millis(100));
        assert!(pacer.poll(Instant::now()).is_ok());
    }

    #[test]
    fn subsequent_poll_within_interval_is_rejected() {
        let mut pacer = Pacer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        pacer.record_send(t0);
        let wait = pacer.poll(t0 + Duration::from_millis(30)).unwrap_err();
        assert!(wait <= Duration::from_millis(70) && wait > Duration::from_millis(60));
    }

    #[test]
    fn poll_after_interval_elapsed_is_allowed() {
        let mut pacer = Pacer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        pacer.record_send(t0);
        assert!(pacer.poll(t0 + Duration::from_millis(100)).is_ok());
    }
}

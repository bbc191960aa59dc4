//! Timer wheel for per-probe timeouts (§4.3/§4.4).
//!
//! Every in-flight probe is enrolled with a deadline of
//! `send_time + per_probe_timeout`. Expiry is reported by polling
//! [`TimerWheel::pop_expired`], which the event loop calls after waiting on
//! I/O readiness for no longer than [`TimerWheel::next_deadline`] allows.
//! Resolution is bounded by `Instant`'s monotonic clock, comfortably under
//! the required 1 ms; algorithm correctness never depends on sub-ms timing.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// An opaque handle identifying an enrolled timer, returned by [`TimerWheel::schedule`]
/// so callers can cancel it (e.g. when a reply arrives before the timeout fires).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug)]
struct Entry<T> {
    deadline: Instant,
    id: TimerId,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.id).cmp(&(other.deadline, other.id))
    }
}

/// A min-heap of pending deadlines keyed by [`Instant`], yielding expired
/// entries in deadline order.
pub struct TimerWheel<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    cancelled: std::collections::HashSet<TimerId>,
    next_id: u64,
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerWheel<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: std::collections::HashSet::new(),
            next_id: 0,
        }
    }

    /// Enroll `payload` to expire at `deadline`, returning its [`TimerId`].
    pub fn schedule(&mut self, deadline: Instant, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse(Entry { deadline, id, payload }));
        id
    }

    /// Convenience wrapper enrolling a timeout `timeout` from now.
    pub fn schedule_after(&mut self, timeout: Duration, payload: T) -> TimerId {
        self.schedule(Instant::now() + timeout, payload)
    }

    /// Cancel a previously scheduled timer. A no-op if it already fired or
    /// was already cancelled; the heap entry is dropped lazily on pop.
    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    /// The duration until the next live deadline, or `None` if the wheel is
    /// empty. Used by the event loop to bound its I/O wait.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(|Reverse(e)| {
            e.deadline.saturating_duration_since(Instant::now())
        })
    }

    /// Pop and return every entry whose deadline has passed, in deadline
    /// order, skipping cancelled ones.
    pub fn pop_expired(&mut self) -> Vec<T> {
        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry exists");
            if !self.cancelled.remove(&entry.id) {
                expired.push(entry.payload);
            }
        }
        expired
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn expires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.schedule(now + Duration::from_millis(20), "second");
        wheel.schedule(now + Duration::from_millis(5), "first");
        sleep(Duration::from_millis(30));
        assert_eq!(wheel.pop_expired(), vec!["first", "second"]);
    }

    #[test]
    fn cancelled_timer_is_skipped() {
        let mut wheel = TimerWheel::new();
        let id = wheel.schedule_after(Duration::from_millis(1), "cancel-me");
        wheel.schedule_after(Duration::from_millis(1), "keep-me");
        wheel.cancel(id);
        sleep(Duration::from_millis(5));
        assert_eq!(wheel.pop_expired(), vec!["keep-me"]);
    }

    #[test]
    fn next_deadline_reflects_earliest_entry() {
        let mut wheel: TimerWheel<()> = TimerWheel::new();
        assert!(wheel.next_deadline().is_none());
        wheel.schedule_after(Duration::from_millis(50), ());
        let remaining = wheel.next_deadline().unwrap();
        assert!(remaining <= Duration::from_millis(50));
    }
}

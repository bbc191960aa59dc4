//! The flow-identifier pool (§4.7): a deterministic generator producing
//! pairwise-distinct values in `[flow_min, flow_max]`, skipping reserved
//! identifiers (the traceroute algorithm's own fixed default ports, so an
//! MDA instance sharing the loop with a traceroute instance never collides
//! with it).

use crate::types::FlowId;
use std::collections::HashSet;

/// Full 16-bit range minus the handful of ports §4.6 reserves as traceroute
/// defaults, per §4.7: "default the full 16-bit port range minus the
/// reserved defaults".
#[must_use]
pub fn default_reserved() -> HashSet<u16> {
    [33456, 33457, 16449, 16963, 53, 80]
        .into_iter()
        .collect()
}

/// Issues pairwise-distinct [`FlowId`]s in `[min, max]`, walking the range
/// sequentially (deterministic, so a test can predict exactly which flow
/// identifiers a run will use) and skipping reserved values.
#[derive(Debug, Clone)]
pub struct FlowPool {
    min: u16,
    max: u16,
    reserved: HashSet<u16>,
    issued: HashSet<u16>,
    cursor: u32,
}

impl FlowPool {
    #[must_use]
    pub fn new(min: u16, max: u16, reserved: HashSet<u16>) -> Self {
        Self {
            min,
            max,
            reserved,
            issued: HashSet::new(),
            cursor: u32::from(min),
        }
    }

    /// A pool over the full range with the traceroute default ports
    /// reserved, matching §4.7's default.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(1, u16::MAX, default_reserved())
    }

    /// Draw the next unused, non-reserved flow identifier, or `None` if the
    /// whole range has been exhausted.
    pub fn next_id(&mut self) -> Option<FlowId> {
        let span = u32::from(self.max) - u32::from(self.min) + 1;
        for _ in 0..span {
            let candidate = self.min as u32 + (self.cursor - u32::from(self.min)) % span;
            self.cursor += 1;
            let candidate = candidate as u16;
            if self.reserved.contains(&candidate) || self.issued.contains(&candidate) {
                continue;
            }
            self.issued.insert(candidate);
            return Some(FlowId(candidate));
        }
        None
    }

    #[must_use]
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_pairwise_distinct_ids() {
        let mut pool = FlowPool::new(1, 100, HashSet::new());
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let id = pool.next_id().unwrap();
            assert!(seen.insert(id.0), "duplicate flow id {}", id.0);
        }
    }

    #[test]
    fn skips_reserved_ids() {
        let mut pool = FlowPool::new(1, 3, [2].into_iter().collect());
        assert_eq!(pool.next_id(), Some(FlowId(1)));
        assert_eq!(pool.next_id(), Some(FlowId(3)));
        assert_eq!(pool.next_id(), None);
    }

    #[test]
    fn exhausted_range_returns_none() {
        let mut pool = FlowPool::new(1, 1, HashSet::new());
        assert_eq!(pool.next_id(), Some(FlowId(1)));
        assert_eq!(pool.next_id(), None);
    }
}

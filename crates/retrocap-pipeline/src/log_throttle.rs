use std::sync::atomic::{AtomicU32, Ordering};

/// Logs the first `limit` occurrences of some recurring, non-fatal condition
/// and then goes quiet, mirroring the original source's
/// `m_desyncFrameCount`-style counters for PTS retrocession and bad-input
/// warnings. Shared by the synchronizer, encoder and muxer.
pub struct LogThrottle {
    count: AtomicU32,
    limit: u32,
}

impl LogThrottle {
    pub const fn new(limit: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            limit,
        }
    }

    /// Returns `true` if the caller should emit a log line for this
    /// occurrence. Always increments, even once silenced, so callers can
    /// inspect `total()` for a final "N suppressed" summary if desired.
    pub fn should_log(&self) -> bool {
        let prev = self.count.fetch_add(1, Ordering::Relaxed);
        prev < self.limit
    }

    pub fn total(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_logging_after_limit() {
        let throttle = LogThrottle::new(2);
        assert!(throttle.should_log());
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
        assert!(!throttle.should_log());
        assert_eq!(throttle.total(), 4);
    }
}

//! Sliding-window byte rate.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tracks bytes moved over the last `window`.
#[derive(Debug)]
pub struct BandwidthMonitor {
    window: Duration,
    events: Mutex<VecDeque<(Instant, usize)>>,
}

impl BandwidthMonitor {
    /// Creates a monitor; a zero window is treated as one second.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let window = if window.is_zero() { Duration::from_secs(1) } else { window };
        Self {
            window,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Records `bytes` moved now.
    pub fn add(&self, bytes: usize) {
        self.add_at(Instant::now(), bytes);
    }

    fn add_at(&self, at: Instant, bytes: usize) {
        let Ok(mut events) = self.events.lock() else {
            tracing::warn!("poisoned lock: bandwidth monitor");
            return;
        };
        events.push_back((at, bytes));
        Self::expire(&mut events, at, self.window);
    }

    fn expire(events: &mut VecDeque<(Instant, usize)>, now: Instant, window: Duration) {
        while let Some((at, _)) = events.front() {
            if now.duration_since(*at) > window {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes recorded within the window.
    #[must_use]
    pub fn bytes_in_window(&self) -> usize {
        let Ok(mut events) = self.events.lock() else {
            return 0;
        };
        Self::expire(&mut events, Instant::now(), self.window);
        events.iter().map(|(_, bytes)| bytes).sum()
    }

    /// Average bytes per second over the window.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        let total = u64::try_from(self.bytes_in_window()).unwrap_or(u64::MAX);
        let seconds = self.window.as_secs().max(1);
        total / seconds
    }

    /// Drops all recorded events.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_window() {
        let monitor = BandwidthMonitor::new(Duration::from_secs(10));
        monitor.add(500);
        monitor.add(500);
        assert_eq!(monitor.bytes_in_window(), 1000);
        assert_eq!(monitor.bytes_per_second(), 100);
        monitor.clear();
        assert_eq!(monitor.bytes_in_window(), 0);
    }

    #[test]
    fn test_old_events_expire() {
        let monitor = BandwidthMonitor::new(Duration::from_millis(50));
        let past = Instant::now().checked_sub(Duration::from_secs(1));
        if let Some(past) = past {
            monitor.add_at(past, 999);
        }
        monitor.add(1);
        assert_eq!(monitor.bytes_in_window(), 1);
    }
}

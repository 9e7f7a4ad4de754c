//! Moving average of server response times over a trailing window.

use std::time::{Duration, Instant};

/// Trailing window over which response times are averaged.
pub const DEFAULT_PING_WINDOW: Duration = Duration::from_secs(60);

/// Tracks recent round-trip times for a single server.
///
/// Samples outside the window stop counting towards the average, with one
/// exception: while at least one sample is stored, the most recent one is
/// always reported, so a momentarily idle but alive server does not
/// oscillate between a finite and an unreachable average. A failed probe
/// clears the window outright; the all-time minimum survives clears.
#[derive(Debug)]
pub struct PingTracker {
    window: Duration,
    samples: Vec<(Instant, Duration)>,
    minimum: Option<Duration>,
}

impl PingTracker {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_PING_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: Vec::new(),
            minimum: None,
        }
    }

    /// Records a response time, or `None` for a failure to respond.
    ///
    /// A failure discards all stored samples immediately rather than
    /// averaging in as an unreachable value.
    pub fn record(&mut self, sample: Option<Duration>) {
        match sample {
            Some(rtt) => {
                let now = Instant::now();
                self.evict_stale(now);
                self.samples.push((now, rtt));
                self.minimum = Some(self.minimum.map_or(rtt, |current| current.min(rtt)));
            }
            None => self.samples.clear(),
        }
    }

    /// Mean response time over the window, or `None` while unreachable.
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }

        let threshold = Instant::now().checked_sub(self.window);
        let fresh: Vec<Duration> = self
            .samples
            .iter()
            .filter(|(taken, _)| threshold.map_or(true, |cutoff| *taken >= cutoff))
            .map(|(_, rtt)| *rtt)
            .collect();

        if fresh.is_empty() {
            // Every sample is stale; keep reporting the latest one.
            return self.samples.last().map(|(_, rtt)| *rtt);
        }

        let total: Duration = fresh.iter().sum();
        Some(total / fresh.len() as u32)
    }

    /// Smallest response time ever measured; never reset.
    pub fn minimum(&self) -> Option<Duration> {
        self.minimum
    }

    fn evict_stale(&mut self, now: Instant) {
        let Some(threshold) = now.checked_sub(self.window) else {
            return;
        };

        let stale = self
            .samples
            .iter()
            .take_while(|(taken, _)| *taken < threshold)
            .count();

        if stale == 0 {
            return;
        }

        if stale >= self.samples.len() {
            // Always keep the latest sample.
            self.samples.drain(..self.samples.len() - 1);
        } else {
            self.samples.drain(..stale);
        }
    }
}

impl Default for PingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::thread::sleep;

    #[test]
    fn test_average_of_recent_samples() {
        let mut ping = PingTracker::new();
        ping.record(Some(Duration::from_millis(10)));
        ping.record(Some(Duration::from_millis(30)));

        let average = ping.average().unwrap();
        assert_approx_eq!(average.as_secs_f64(), 0.020, 1e-9);
    }

    #[test]
    fn test_unreached_server_has_no_average() {
        let ping = PingTracker::new();
        assert_eq!(ping.average(), None);
        assert_eq!(ping.minimum(), None);
    }

    #[test]
    fn test_failure_clears_average_but_not_minimum() {
        let mut ping = PingTracker::new();
        ping.record(Some(Duration::from_millis(50)));
        ping.record(None);

        assert_eq!(ping.average(), None);
        assert_eq!(ping.minimum(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_minimum_tracks_smallest_sample() {
        let mut ping = PingTracker::new();
        ping.record(Some(Duration::from_millis(40)));
        ping.record(Some(Duration::from_millis(15)));
        ping.record(Some(Duration::from_millis(25)));

        assert_eq!(ping.minimum(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn test_latest_sample_survives_window_expiry() {
        let mut ping = PingTracker::with_window(Duration::from_millis(10));
        ping.record(Some(Duration::from_millis(42)));

        sleep(Duration::from_millis(25));

        // Stale but never fully empty while a sample exists.
        assert_eq!(ping.average(), Some(Duration::from_millis(42)));
    }

    #[test]
    fn test_stale_samples_stop_counting() {
        let mut ping = PingTracker::with_window(Duration::from_millis(20));
        ping.record(Some(Duration::from_millis(100)));

        sleep(Duration::from_millis(30));

        ping.record(Some(Duration::from_millis(10)));

        // The first sample fell out of the window at record time.
        assert_eq!(ping.average(), Some(Duration::from_millis(10)));
        assert_eq!(ping.minimum(), Some(Duration::from_millis(10)));
    }
}

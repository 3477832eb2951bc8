use foundation::time::Time;

/// Leading+trailing throttle over an explicit timebase.
///
/// The first submission in a quiet period fires immediately (leading edge).
/// Further submissions inside the wait window are coalesced; once the window
/// elapses, `poll` releases the latest one (trailing edge). At most one
/// value is ever in flight per window, and the trailing value is always the
/// newest.
#[derive(Debug)]
pub struct Throttle<T> {
    wait_s: f64,
    window_start: Option<Time>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(wait_s: f64) -> Self {
        Self {
            wait_s,
            window_start: None,
            pending: None,
        }
    }

    /// Submit a value. Returns it back when the leading edge fires; `None`
    /// when it was stashed for the trailing edge.
    pub fn submit(&mut self, now: Time, value: T) -> Option<T> {
        match self.window_start {
            Some(start) if now.elapsed_since(start) < self.wait_s => {
                self.pending = Some(value);
                None
            }
            _ => {
                self.window_start = Some(now);
                self.pending = None;
                Some(value)
            }
        }
    }

    /// Release the trailing value once the wait window has elapsed.
    pub fn poll(&mut self, now: Time) -> Option<T> {
        let start = self.window_start?;
        if now.elapsed_since(start) < self.wait_s {
            return None;
        }
        let value = self.pending.take()?;
        // The trailing fire opens a fresh window so bursts stay throttled.
        self.window_start = Some(now);
        Some(value)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::Throttle;
    use foundation::time::Time;

    #[test]
    fn leading_edge_fires_immediately() {
        let mut throttle = Throttle::new(0.1);
        assert_eq!(throttle.submit(Time(0.0), "a"), Some("a"));
    }

    #[test]
    fn calls_inside_window_collapse_to_latest() {
        let mut throttle = Throttle::new(0.1);
        assert_eq!(throttle.submit(Time(0.0), 1), Some(1));
        assert_eq!(throttle.submit(Time(0.02), 2), None);
        assert_eq!(throttle.submit(Time(0.05), 3), None);

        // Still inside the window: nothing to release yet.
        assert_eq!(throttle.poll(Time(0.09)), None);
        // Window elapsed: the trailing call sees the latest value only.
        assert_eq!(throttle.poll(Time(0.1)), Some(3));
        assert_eq!(throttle.poll(Time(0.2)), None);
    }

    #[test]
    fn quiet_period_resets_the_leading_edge() {
        let mut throttle = Throttle::new(0.1);
        assert_eq!(throttle.submit(Time(0.0), 1), Some(1));
        assert_eq!(throttle.submit(Time(0.5), 2), Some(2));
    }
}

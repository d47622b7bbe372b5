use chrono::NaiveDateTime;
use std::time::Duration;

/// Rate limit for logging unknown faces.
///
/// Unknown faces are not individuated, so there is a single global
/// last-logged instant rather than one per face.
#[derive(Debug, Clone)]
pub struct UnknownThrottle {
    interval: Duration,
    last_logged: Option<NaiveDateTime>,
}

impl UnknownThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: None,
        }
    }

    /// True if more than `interval` has passed since the last logged
    /// unknown; records `now` as the new last-logged instant when it is.
    pub fn should_log_unknown(&mut self, now: NaiveDateTime) -> bool {
        let due = match self.last_logged {
            None => true,
            Some(last) => {
                let elapsed_ms = (now - last).num_milliseconds();
                let interval_ms = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX);
                elapsed_ms > interval_ms
            }
        };
        if due {
            self.last_logged = Some(now);
        }
        due
    }

    pub fn last_logged(&self) -> Option<NaiveDateTime> {
        self.last_logged
    }
}

impl Default for UnknownThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_interval_sequence() {
        let mut th = UnknownThrottle::new(Duration::from_secs(10));
        assert!(th.should_log_unknown(t(0)));
        assert!(!th.should_log_unknown(t(5)));
        assert!(th.should_log_unknown(t(11)));
    }

    #[test]
    fn test_exact_interval_is_not_enough() {
        let mut th = UnknownThrottle::new(Duration::from_secs(10));
        assert!(th.should_log_unknown(t(0)));
        assert!(!th.should_log_unknown(t(10)));
        assert!(th.should_log_unknown(t(10) + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_suppressed_calls_do_not_move_the_window() {
        let mut th = UnknownThrottle::new(Duration::from_secs(10));
        assert!(th.should_log_unknown(t(0)));
        for s in 1..=10 {
            assert!(!th.should_log_unknown(t(s)));
        }
        assert_eq!(th.last_logged(), Some(t(0)));
        assert!(th.should_log_unknown(t(11)));
    }
}

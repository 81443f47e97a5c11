//! Time source for the pipeline.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

/// Supplies the current time and the truncations derived from it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// `ts` truncated to the hour.
    fn start_of_hour(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0))
            .unwrap_or(ts)
    }

    /// Midnight UTC of the current day.
    fn start_of_today(&self) -> DateTime<Utc> {
        let midnight = self.now().date_naive().and_time(chrono::NaiveTime::MIN);
        Utc.from_utc_datetime(&midnight)
    }

    /// The end of the hour starting at `start_of_hour(ts)`.
    fn end_of_hour(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of_hour(ts) + Duration::hours(1)
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn truncates_to_hour_and_day() {
        let clock = FixedClock(at("2024-03-05T17:42:13.250Z"));
        assert_eq!(clock.start_of_hour(clock.now()), at("2024-03-05T17:00:00Z"));
        assert_eq!(clock.end_of_hour(clock.now()), at("2024-03-05T18:00:00Z"));
        assert_eq!(clock.start_of_today(), at("2024-03-05T00:00:00Z"));
    }

    #[test]
    fn start_of_hour_is_idempotent() {
        let clock = SystemClock;
        let ts = at("2024-03-05T17:00:00Z");
        assert_eq!(clock.start_of_hour(ts), ts);
    }
}

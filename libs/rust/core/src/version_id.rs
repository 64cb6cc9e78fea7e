//! Timestamp-derived version identifiers.
//!
//! Ids have the shape `YYYYMMDD_HHMMSS_ffffff` (UTC, microseconds), so lexical
//! order matches creation order. Within a process the generator never issues
//! the same instant twice: a clock that has not moved past the last issued
//! instant is bumped by one microsecond. Two processes saving the same model
//! type in the same microsecond can still draw the same id; `save_model`
//! skips ids that already have an artifact.

use chrono::{DateTime, Duration, DurationRound, Utc};
use parking_lot::Mutex;

pub const VERSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

#[derive(Debug, Default)]
pub struct VersionIdGenerator {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl VersionIdGenerator {
    pub fn new() -> Self { Self::default() }

    /// Returns the id together with the instant it encodes.
    pub fn next(&self) -> (String, DateTime<Utc>) { self.next_at(Utc::now()) }

    pub fn next_at(&self, now: DateTime<Utc>) -> (String, DateTime<Utc>) {
        let now = now.duration_trunc(Duration::microseconds(1)).unwrap_or(now);
        let mut last = self.last.lock();
        let issued = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(issued);
        (format_version_id(issued), issued)
    }
}

pub fn format_version_id(at: DateTime<Utc>) -> String { at.format(VERSION_ID_FORMAT).to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_are_monotonic_when_clock_stalls() {
        let gen = VersionIdGenerator::new();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let (a, ta) = gen.next_at(t);
        let (b, tb) = gen.next_at(t);
        let (c, _) = gen.next_at(t - Duration::seconds(3));
        assert_eq!(a, "20240301_123005_000000");
        assert_eq!(b, "20240301_123005_000001");
        assert_eq!(c, "20240301_123005_000002");
        assert!(tb > ta);
    }

    #[test]
    fn sub_microsecond_precision_is_dropped() {
        let gen = VersionIdGenerator::new();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::nanoseconds(1_500);
        let (id, at) = gen.next_at(t);
        assert_eq!(id, "20240301_000000_000001");
        assert_eq!(format_version_id(at), id);
    }
}

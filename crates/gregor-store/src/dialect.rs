//! SQL-dialect-specific spelling of time expressions.
//!
//! Databases disagree on how "now" and "now + offset" are written, so the
//! engine funnels every time expression through a [`TimeDialect`]. The rest
//! of the query machinery stays portable.

use chrono::{DateTime, Utc};
use gregor_core::{Clock, TimeOrOffset};
use rusqlite::types::Value;

use crate::builder::QueryBuilder;

pub trait TimeDialect {
    /// Append a fragment that evaluates to the current instant.
    fn emit_now(&self, qb: &mut QueryBuilder<'_>, clock: &dyn Clock);

    /// Append a fragment that evaluates to an absolute instant, to
    /// now + offset, or to now when the value is unspecified.
    fn emit_time_or_offset(&self, qb: &mut QueryBuilder<'_>, clock: &dyn Clock, t: &TimeOrOffset);

    /// Convert an absolute instant into a driver parameter suitable for
    /// exact comparison against stored values.
    fn bind_time(&self, t: DateTime<Utc>) -> Value;
}

/// Microseconds since the Unix epoch, the stored form of every time column.
pub fn micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

pub fn time_from_micros(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

/// SQLite spelling: time columns are INTEGER microseconds, and "now" is the
/// injected clock bound as a parameter. SQLite's own CURRENT_TIMESTAMP has
/// whole-second resolution, which is too coarse for ctime ordering; binding
/// the clock also keeps ingest deterministic under a test clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl TimeDialect for SqliteDialect {
    fn emit_now(&self, qb: &mut QueryBuilder<'_>, clock: &dyn Clock) {
        qb.push("?", vec![self.bind_time(clock.now())]);
    }

    fn emit_time_or_offset(&self, qb: &mut QueryBuilder<'_>, clock: &dyn Clock, t: &TimeOrOffset) {
        match t {
            TimeOrOffset::At(at) => qb.push("?", vec![self.bind_time(*at)]),
            TimeOrOffset::OffsetMs(ms) => {
                let at = clock.now() + chrono::Duration::milliseconds(*ms);
                qb.push("?", vec![self.bind_time(at)]);
            }
            TimeOrOffset::Unspecified => self.emit_now(qb, clock),
        }
    }

    fn bind_time(&self, t: DateTime<Utc>) -> Value {
        Value::Integer(micros(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gregor_core::FakeClock;

    #[test]
    fn micros_round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(time_from_micros(micros(t)), Some(t));
    }

    #[test]
    fn bind_time_is_integer_micros() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        match SqliteDialect.bind_time(t) {
            Value::Integer(us) => assert_eq!(us, t.timestamp_micros()),
            other => panic!("expected integer, got {other:?}"),
        }
    }

    #[test]
    fn offset_emits_single_param() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(start);
        let dialect = SqliteDialect;
        let mut qb = QueryBuilder::new(&dialect, &clock);
        qb.time_or_offset(&TimeOrOffset::OffsetMs(3_000));
        assert_eq!(qb.sql(), "?");
        assert_eq!(
            qb.params(),
            &[Value::Integer(
                (start + chrono::Duration::seconds(3)).timestamp_micros()
            )]
        );
    }
}

//! Job payload shape and delay arithmetic.

use crate::clock::Clock;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration as StdDuration;

/// The serialized form stored in Redis.
///
/// Only `id`, `attempts`, and `reserved_at` are read or written by the
/// broker. Everything else — `job`, `data`, or any field a caller adds via
/// `push_raw` — rides along in `extra` and is preserved byte-for-byte across
/// every transition (push, migrate, pop, release).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    /// 32-character random job ID, broker-generated.
    pub id: String,
    /// Number of times this job has been reserved. Monotonically
    /// non-decreasing across the job's lifetime.
    pub attempts: u32,
    /// Unix time of the most recent reservation. `None` until first popped.
    pub reserved_at: Option<i64>,
    /// All other caller-owned fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Payload {
    /// Build a payload carrying a job name and serialized data, as used by
    /// the broker façade's `push`/`later`/`bulk`.
    pub fn new<T: Serialize>(job: &str, data: &T) -> Result<Self, Error> {
        let mut extra = Map::new();
        extra.insert("job".to_string(), Value::String(job.to_string()));
        extra.insert("data".to_string(), serde_json::to_value(data)?);

        Ok(Self {
            id: crate::id::random_id(),
            attempts: 0,
            reserved_at: None,
            extra,
        })
    }

    /// Serialize to the wire JSON format.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the wire JSON format.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// The `job` name, if this payload was built by `push`/`later`/`bulk`.
    pub fn job_name(&self) -> Option<&str> {
        self.extra.get("job").and_then(Value::as_str)
    }

    /// The raw `data` value, if this payload was built by
    /// `push`/`later`/`bulk`.
    pub fn data(&self) -> Option<&Value> {
        self.extra.get("data")
    }
}

/// When a job should become available for reservation.
///
/// Accepts an absolute instant, a relative `std::time::Duration`, or a plain
/// integer seconds offset, per the broker's `availableAt(delay)` contract.
#[derive(Debug, Clone, Copy)]
pub enum Delay {
    /// Available immediately.
    Now,
    /// Available `seconds` from now.
    Seconds(i64),
    /// Available `duration` from now.
    After(StdDuration),
    /// Available at this absolute instant.
    At(DateTime<Utc>),
}

impl Delay {
    /// Resolve to an absolute Unix timestamp using the given clock.
    pub fn resolve(&self, clock: &dyn Clock) -> i64 {
        match self {
            Delay::Now => clock.now(),
            Delay::Seconds(s) => clock.now() + s,
            Delay::After(d) => clock.now() + d.as_secs() as i64,
            Delay::At(dt) => dt.timestamp(),
        }
    }
}

impl From<StdDuration> for Delay {
    fn from(d: StdDuration) -> Self {
        Delay::After(d)
    }
}

impl From<i64> for Delay {
    fn from(seconds: i64) -> Self {
        Delay::Seconds(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn payload_round_trips_through_json() {
        let payload = Payload::new("SendEmail", &serde_json::json!({"to": "a@b.com"})).unwrap();
        let json = payload.to_json().unwrap();
        let restored = Payload::from_json(&json).unwrap();
        assert_eq!(payload, restored);
    }

    #[test]
    fn unknown_fields_survive_round_trip_untouched() {
        let json = r#"{"id":"abc","attempts":3,"reserved_at":null,"job":"X","data":{},"custom_field":"keep-me","nested":{"a":1}}"#;
        let payload = Payload::from_json(json).unwrap();
        assert_eq!(
            payload.extra.get("custom_field").unwrap().as_str(),
            Some("keep-me")
        );
        let back = payload.to_json().unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&back).unwrap();
        assert_eq!(reparsed["custom_field"], "keep-me");
        assert_eq!(reparsed["nested"]["a"], 1);
    }

    #[test]
    fn mutating_attempts_leaves_extra_fields_alone() {
        let mut payload = Payload::new("J", &1).unwrap();
        payload.extra.insert("tag".into(), Value::String("x".into()));
        payload.attempts += 1;
        payload.reserved_at = Some(42);
        assert_eq!(payload.extra.get("tag").unwrap().as_str(), Some("x"));
        assert_eq!(payload.attempts, 1);
    }

    #[test]
    fn delay_now_equals_clock_now() {
        let clock = ManualClock::new(1_000);
        assert_eq!(Delay::Now.resolve(&clock), 1_000);
    }

    #[test]
    fn delay_seconds_offsets_from_now() {
        let clock = ManualClock::new(1_000);
        assert_eq!(Delay::Seconds(30).resolve(&clock), 1_030);
        let d: Delay = 30i64.into();
        assert_eq!(d.resolve(&clock), 1_030);
    }

    #[test]
    fn delay_duration_offsets_from_now() {
        let clock = ManualClock::new(1_000);
        let delay: Delay = StdDuration::from_secs(5).into();
        assert_eq!(delay.resolve(&clock), 1_005);
    }

    #[test]
    fn delay_at_uses_absolute_instant() {
        let clock = ManualClock::new(1_000);
        let at = DateTime::from_timestamp(5_000, 0).unwrap();
        assert_eq!(Delay::At(at).resolve(&clock), 5_000);
    }
}

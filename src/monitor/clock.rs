//! Time source for windowed NotReady counting
//!
//! The tracker asks the clock for "now" on every evaluation. Production
//! uses `SystemClock`; tests pin time with `MockClock` so window edges are
//! deterministic.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for getting the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by `chrono::Utc::now()`
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read a Kubernetes `Time`/`MicroTime` as a UTC timestamp
///
/// Converts through the RFC 3339 wire form.
pub fn from_k8s_time<T: Serialize>(value: &T) -> Option<DateTime<Utc>> {
    let raw = serde_json::to_value(value).ok()?;
    DateTime::parse_from_rfc3339(raw.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Build a Kubernetes `Time`/`MicroTime` from a UTC timestamp
pub fn to_k8s_time<T: DeserializeOwned>(ts: DateTime<Utc>) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(
        ts.to_rfc3339_opts(SecondsFormat::Micros, true),
    ))
    .ok()
}

/// Mock clock for testing with controllable time
#[cfg(test)]
#[allow(clippy::expect_used)]
pub struct MockClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("MockClock lock poisoned");
        *now += duration;
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("MockClock lock poisoned")
    }
}

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Logical instant at which an event is due.
///
/// Totally ordered, so it can key the event queue directly. Wall-clock time is one
/// valid source (`now`), but simulations usually build timestamps from an offset
/// against a fixed origin (`from_millis`, `offset_millis`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// The Unix epoch, handy as the origin of a simulated timeline.
    pub fn epoch() -> Self {
        Self(DateTime::UNIX_EPOCH)
    }

    /// Milliseconds since the Unix epoch. `None` when out of chrono's range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Shifts the timestamp by `millis` (negative values move it back).
    /// Saturates at the current value if the result would be out of range.
    pub fn offset_millis(&self, millis: i64) -> Self {
        TimeDelta::try_milliseconds(millis)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map(Self)
            .unwrap_or(*self)
    }

    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl std::ops::Deref for Timestamp {
    type Target = DateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let early = Timestamp::from_millis(10).unwrap();
        let late = Timestamp::from_millis(20).unwrap();
        assert!(early < late);
        assert_eq!(early.max(late), late);
    }

    #[test]
    fn test_timestamp_epoch_offset() {
        let origin = Timestamp::epoch();
        assert_eq!(origin.as_millis(), 0);
        assert_eq!(origin.offset_millis(1500).as_millis(), 1500);
        assert_eq!(origin.offset_millis(1500).offset_millis(-500).as_millis(), 1000);
    }

    #[test]
    fn test_timestamp_offset_out_of_range_saturates() {
        let origin = Timestamp::epoch();
        assert_eq!(origin.offset_millis(i64::MAX), origin);
    }

    #[test]
    fn test_timestamp_display() {
        let timestamp = Timestamp::epoch();
        assert_eq!(timestamp.to_string(), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_timestamp_serde() {
        let timestamp = Timestamp::from_millis(42).unwrap();
        let serialized = serde_json::to_string(&timestamp).unwrap();
        let deserialized: Timestamp = serde_json::from_str(&serialized).unwrap();
        assert_eq!(timestamp, deserialized);
    }

    #[test]
    fn test_timestamp_deref() {
        let timestamp = Timestamp::from_millis(1_000).unwrap();
        assert_eq!(timestamp.timestamp(), 1);
    }
}

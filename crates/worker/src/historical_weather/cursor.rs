//! Backward date cursor over pending locations
//!
//! `current_date == None` means no location is being walked. Every path that
//! ends a location's backfill clears it together with the unmeasured-day
//! counter, so a stale cursor never leaks into the next location.

use std::collections::VecDeque;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Backfill progress persisted in the checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillCursor {
    #[serde(with = "yyyymmdd")]
    pub current_date: Option<NaiveDate>,
    pub pending_location_ids: VecDeque<i64>,
    pub consecutive_unmeasured_days: u32,
}

impl BackfillCursor {
    /// The location being backfilled
    pub fn head(&self) -> Option<i64> {
        self.pending_location_ids.front().copied()
    }

    pub fn is_idle(&self) -> bool {
        self.current_date.is_none()
    }

    /// Replace the queue with `ids` and forget any walk in progress
    pub fn enqueue(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.pending_location_ids = ids.into_iter().collect();
        self.clear();
    }

    /// Start walking from `start` unless a walk is already in progress
    pub fn start_at(&mut self, start: NaiveDate) -> NaiveDate {
        *self.current_date.get_or_insert(start)
    }

    pub fn record_measured(&mut self) {
        self.consecutive_unmeasured_days = 0;
    }

    pub fn record_unmeasured(&mut self) {
        self.consecutive_unmeasured_days += 1;
    }

    /// Whether the history boundary has been reached for the head location
    pub fn boundary_reached(&self, max_day_count: u32) -> bool {
        self.consecutive_unmeasured_days >= max_day_count
    }

    /// Move one day back in time
    pub fn step_back(&mut self) {
        self.current_date = self
            .current_date
            .and_then(|date| date.checked_sub_days(Days::new(1)));
    }

    /// Drop the head location and reset the walk
    pub fn finish_location(&mut self) -> Option<i64> {
        let finished = self.pending_location_ids.pop_front();
        self.clear();
        finished
    }

    /// Forget the walk in progress
    pub fn clear(&mut self) {
        self.current_date = None;
        self.consecutive_unmeasured_days = 0;
    }
}

/// `Option<NaiveDate>` as `"YYYYMMDD"`
pub(crate) mod yyyymmdd {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y%m%d";

    pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(date) => serializer.serialize_str(&date.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| NaiveDate::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_walk_and_finish() {
        let mut cursor = BackfillCursor::default();
        cursor.enqueue([4, 7]);
        assert_eq!(cursor.head(), Some(4));

        assert_eq!(cursor.start_at(date(2024, 3, 1)), date(2024, 3, 1));
        cursor.step_back();
        // An in-progress walk is not restarted
        assert_eq!(cursor.start_at(date(2024, 5, 5)), date(2024, 2, 29));

        cursor.record_unmeasured();
        cursor.record_unmeasured();
        assert!(cursor.boundary_reached(2));

        assert_eq!(cursor.finish_location(), Some(4));
        assert_eq!(cursor.head(), Some(7));
        assert!(cursor.is_idle());
        assert_eq!(cursor.consecutive_unmeasured_days, 0);
    }

    #[test]
    fn test_measured_day_resets_counter() {
        let mut cursor = BackfillCursor::default();
        cursor.record_unmeasured();
        cursor.record_measured();
        assert_eq!(cursor.consecutive_unmeasured_days, 0);
        assert!(!cursor.boundary_reached(1));
    }

    #[test]
    fn test_date_wire_format() {
        let cursor = BackfillCursor {
            current_date: Some(date(2024, 2, 27)),
            pending_location_ids: VecDeque::from([1]),
            consecutive_unmeasured_days: 2,
        };
        let value = serde_json::to_value(&cursor).expect("should serialize");
        assert_eq!(value["current_date"], json!("20240227"));

        let back: BackfillCursor = serde_json::from_value(value).expect("should deserialize");
        assert_eq!(back, cursor);

        let idle: BackfillCursor =
            serde_json::from_value(json!({"current_date": null})).expect("should deserialize");
        assert!(idle.is_idle());
    }
}

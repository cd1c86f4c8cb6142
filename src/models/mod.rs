pub mod booking;
pub mod client;
pub mod schedule;
pub mod service;
pub mod time_slot;

pub use booking::{Booking, BookingDetails, BookingStatus, ClientSummary, ServiceSummary};
pub use client::Client;
pub use schedule::{GenerateRequest, ScheduleWindow, WeekdayWindow};
pub use service::Service;
pub use time_slot::{AvailableSlot, NewTimeSlot, SlotOccupancy, TimeSlot};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses `HH:MM` (or `HH:MM:SS`, seconds dropped).
pub fn parse_time(s: &str) -> anyhow::Result<chrono::NaiveTime> {
    use chrono::Timelike;

    let s = s.trim();
    let time = chrono::NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| chrono::NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| anyhow::anyhow!("invalid time format: {s}"))?;
    time.with_second(0)
        .ok_or_else(|| anyhow::anyhow!("time out of range: {s}"))
}

/// `date` moved by `days`, or `None` past either end of the calendar.
pub fn add_days(date: chrono::NaiveDate, days: i64) -> Option<chrono::NaiveDate> {
    chrono::Duration::try_days(days).and_then(|d| date.checked_add_signed(d))
}

/// Serde adapter keeping times as `HH:MM` on the wire.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(super::TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_parse_time_accepts_seconds() {
        assert_eq!(parse_time("09:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(parse_time("09:30:45").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn test_add_days_stops_at_calendar_end() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        assert_eq!(add_days(date, 30), chrono::NaiveDate::from_ymd_opt(2025, 7, 16));
        assert_eq!(add_days(chrono::NaiveDate::MAX, 1), None);
        assert_eq!(add_days(date, i64::MAX), None);
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("nine").is_err());
        assert!(parse_time("").is_err());
    }
}

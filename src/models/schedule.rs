use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// One weekday opening window, e.g. `{"day":"mon","start":"09:00","end":"18:00"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub day: String,
    pub start: String,
    pub end: String,
}

/// A validated [`ScheduleWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayWindow {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub windows: Vec<ScheduleWindow>,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: i64,
    #[serde(default = "default_max_bookings")]
    pub max_bookings: i64,
    #[serde(default)]
    pub service_id: Option<String>,
}

fn default_slot_minutes() -> i64 {
    30
}

fn default_max_bookings() -> i64 {
    1
}

pub const MAX_GENERATION_DAYS: i64 = 366;

/// A generated slot never spans more than one day.
pub const MAX_SLOT_MINUTES: i64 = 24 * 60;

impl GenerateRequest {
    pub fn parse_windows(&self) -> Result<Vec<WeekdayWindow>, AppError> {
        if self.end_date < self.start_date {
            return Err(AppError::validation(
                "endDate",
                "endDate must not be before startDate",
            ));
        }
        if (self.end_date - self.start_date).num_days() >= MAX_GENERATION_DAYS {
            return Err(AppError::validation(
                "endDate",
                format!("cannot generate more than {MAX_GENERATION_DAYS} days at once"),
            ));
        }
        if self.slot_minutes <= 0 || self.slot_minutes > MAX_SLOT_MINUTES {
            return Err(AppError::validation(
                "slotMinutes",
                format!("slotMinutes must be between 1 and {MAX_SLOT_MINUTES}"),
            ));
        }
        if self.max_bookings < 1 {
            return Err(AppError::validation(
                "maxBookings",
                "maxBookings must be at least 1",
            ));
        }
        if self.windows.is_empty() {
            return Err(AppError::validation("windows", "at least one window is required"));
        }

        self.windows
            .iter()
            .map(|w| {
                let weekday = parse_weekday(&w.day)
                    .map_err(|e| AppError::validation("windows", e.to_string()))?;
                let start = super::parse_time(&w.start)
                    .map_err(|e| AppError::validation("windows", e.to_string()))?;
                let end = super::parse_time(&w.end)
                    .map_err(|e| AppError::validation("windows", e.to_string()))?;
                if end <= start {
                    return Err(AppError::validation(
                        "windows",
                        format!("window {} {}-{} ends before it starts", w.day, w.start, w.end),
                    ));
                }
                Ok(WeekdayWindow {
                    weekday,
                    start,
                    end,
                })
            })
            .collect()
    }
}

impl WeekdayWindow {
    pub fn applies_to(&self, date: NaiveDate) -> bool {
        date.weekday() == self.weekday
    }

    /// Consecutive `slot_minutes` pieces that fit entirely inside the window.
    pub fn pieces(&self, slot_minutes: i64) -> Vec<(NaiveTime, NaiveTime)> {
        let mut pieces = vec![];
        let Some(step) = chrono::Duration::try_minutes(slot_minutes) else {
            return pieces;
        };
        let mut cursor = self.start;
        loop {
            let (next, wrapped) = cursor.overflowing_add_signed(step);
            if wrapped != 0 || next <= cursor || next > self.end {
                break;
            }
            pieces.push((cursor, next));
            cursor = next;
        }
        pieces
    }
}

fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    match s.trim().to_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        _ => Err(anyhow::anyhow!("invalid weekday: {s}")),
    }
}

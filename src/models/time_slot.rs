use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: String,
    pub date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "super::hhmm")]
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub service_id: Option<String>,
    pub max_bookings: i64,
    pub current_bookings: i64,
}

impl TimeSlot {
    pub fn span_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_bookings < self.max_bookings
    }

    /// A slot without a service is open to any service.
    pub fn is_open_to(&self, service_id: Option<&str>) -> bool {
        match (self.service_id.as_deref(), service_id) {
            (None, _) | (_, None) => true,
            (Some(own), Some(requested)) => own == requested,
        }
    }
}

/// A slot together with the ids of its non-cancelled bookings.
#[derive(Debug, Clone)]
pub struct SlotOccupancy {
    pub slot: TimeSlot,
    pub active_booking_ids: Vec<String>,
}

impl SlotOccupancy {
    pub fn is_free(&self) -> bool {
        self.active_booking_ids.is_empty()
    }
}

/// A slot that can host the requested service, with the time that service would end.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    #[serde(flatten)]
    pub slot: TimeSlot,
    #[serde(with = "super::hhmm")]
    pub service_end_time: NaiveTime,
}

impl AvailableSlot {
    /// `None` when the service would run past midnight. Chains never cross a
    /// day boundary, so the engine only builds these for same-day services.
    pub fn new(slot: TimeSlot, duration_minutes: i64) -> Option<Self> {
        let (service_end_time, wrapped) = slot
            .start_time
            .overflowing_add_signed(Duration::try_minutes(duration_minutes)?);
        if wrapped != 0 || service_end_time < slot.start_time {
            return None;
        }
        Some(Self {
            slot,
            service_end_time,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimeSlot {
    pub date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "super::hhmm")]
    pub end_time: NaiveTime,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default = "default_max_bookings")]
    pub max_bookings: i64,
}

fn default_true() -> bool {
    true
}

fn default_max_bookings() -> i64 {
    1
}

impl NewTimeSlot {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            date,
            start_time,
            end_time,
            is_available: true,
            service_id: None,
            max_bookings: 1,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.end_time <= self.start_time {
            return Err(AppError::validation(
                "endTime",
                format!(
                    "end time {} must be after start time {}",
                    self.end_time.format(super::TIME_FORMAT),
                    self.start_time.format(super::TIME_FORMAT)
                ),
            ));
        }
        if self.max_bookings < 1 {
            return Err(AppError::validation(
                "maxBookings",
                "maxBookings must be at least 1",
            ));
        }
        if matches!(self.service_id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(AppError::validation("serviceId", "serviceId must not be blank"));
        }
        Ok(())
    }
}

use chrono::{Duration, NaiveDateTime};
use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;

use crate::config::CategoryDurations;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingDetails, BookingStatus, ServiceSummary};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub service_id: String,
    pub time_slot_id: String,
    #[serde(default)]
    pub client_notes: Option<String>,
}

pub const MAX_LIST_LIMIT: i64 = 500;

/// Books `request.time_slot_id` for `client_id` in one immediate transaction.
///
/// All checks run under the write lock, before anything is written; the first
/// failing check aborts the transaction.
pub fn create_booking(
    conn: &mut Connection,
    durations: &CategoryDurations,
    client_id: &str,
    request: &CreateBookingRequest,
    now: NaiveDateTime,
) -> Result<BookingDetails, AppError> {
    if request.service_id.trim().is_empty() {
        return Err(AppError::validation("serviceId", "serviceId is required"));
    }
    if request.time_slot_id.trim().is_empty() {
        return Err(AppError::validation("timeSlotId", "timeSlotId is required"));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let service = queries::get_service(&tx, &request.service_id)?
        .filter(|s| s.is_active)
        .ok_or_else(|| AppError::NotFound("service".to_string()))?;

    let slot = queries::get_time_slot(&tx, &request.time_slot_id)?
        .filter(|s| s.is_available)
        .ok_or_else(|| AppError::NotFound("time slot".to_string()))?;

    if !slot.has_capacity() {
        return Err(AppError::conflict("slot_full", "this time slot is fully booked"));
    }

    if slot.starts_at() <= now {
        return Err(AppError::validation(
            "timeSlotId",
            "cannot book a time slot in the past",
        ));
    }

    if queries::has_active_booking(&tx, client_id, &slot.id)? {
        return Err(AppError::conflict(
            "duplicate_booking",
            "you already have a booking for this time slot",
        ));
    }

    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client_id.to_string(),
        service_id: service.id.clone(),
        time_slot_id: slot.id.clone(),
        status: BookingStatus::Pending,
        booking_date: slot.starts_at(),
        duration_minutes: durations.resolve(&service),
        total_price: service.price,
        client_notes: request
            .client_notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        cancelled_at: None,
        cancelled_by: None,
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    };

    queries::insert_booking(&tx, &booking)?;
    if !queries::increment_slot_bookings(&tx, &slot.id)? {
        return Err(AppError::conflict("slot_full", "this time slot is fully booked"));
    }

    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        client_id,
        service_id = %booking.service_id,
        slot_id = %booking.time_slot_id,
        booking_date = %booking.booking_date,
        "booking created"
    );

    load_details(conn, &booking.id)
}

/// Client-initiated cancellation, refused inside the lead-time window.
pub fn cancel_booking(
    conn: &mut Connection,
    booking_id: &str,
    client_id: &str,
    reason: Option<&str>,
    now: NaiveDateTime,
    lead_hours: i64,
) -> Result<BookingDetails, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let booking = queries::get_booking_by_id(&tx, booking_id)?
        .filter(|b| b.client_id == client_id && b.status.client_can_cancel())
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;

    let until = booking.booking_date - now;
    let lead = Duration::try_hours(lead_hours).unwrap_or(Duration::MAX);
    if until < lead {
        let hours = until.num_seconds() as f64 / 3600.0;
        return Err(AppError::CancellationTooLate {
            hours_until_booking: (hours * 100.0).round() / 100.0,
            lead_hours,
        });
    }

    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    queries::mark_booking_cancelled(&tx, &booking.id, &now, "client", reason)?;
    queries::decrement_slot_bookings(&tx, &booking.time_slot_id)?;

    tx.commit()?;

    tracing::info!(booking_id, client_id, "booking cancelled by client");

    load_details(conn, booking_id)
}

/// Staff status change. Keeps the slot counter in step when a booking enters
/// or leaves the cancelled state.
pub fn update_booking_status(
    conn: &mut Connection,
    booking_id: &str,
    status: BookingStatus,
    now: NaiveDateTime,
) -> Result<BookingDetails, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let booking = queries::get_booking_by_id(&tx, booking_id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;

    if booking.status == status {
        drop(tx);
        return load_details(conn, booking_id);
    }

    match (booking.status.holds_capacity(), status.holds_capacity()) {
        (true, false) => {
            queries::mark_booking_cancelled(&tx, booking_id, &now, "admin", None)?;
            queries::decrement_slot_bookings(&tx, &booking.time_slot_id)?;
        }
        (false, true) => {
            if queries::has_active_booking(&tx, &booking.client_id, &booking.time_slot_id)? {
                return Err(AppError::conflict(
                    "duplicate_booking",
                    "client already has another booking for this time slot",
                ));
            }
            if !queries::increment_slot_bookings(&tx, &booking.time_slot_id)? {
                return Err(AppError::conflict(
                    "slot_full",
                    "cannot reinstate booking: time slot is fully booked",
                ));
            }
            queries::reinstate_booking(&tx, booking_id, &status, &now)?;
        }
        _ => {
            queries::update_booking_status(&tx, booking_id, &status, &now)?;
        }
    }

    tx.commit()?;

    tracing::info!(
        booking_id,
        from = booking.status.as_str(),
        to = status.as_str(),
        "booking status updated"
    );

    load_details(conn, booking_id)
}

pub fn get_booking_details(conn: &Connection, booking_id: &str) -> Result<Option<BookingDetails>, AppError> {
    let Some(booking) = queries::get_booking_by_id(conn, booking_id)? else {
        return Ok(None);
    };

    let service = queries::get_service(conn, &booking.service_id)?.ok_or_else(|| {
        AppError::Unexpected(anyhow::anyhow!(
            "booking {booking_id} references missing service {}",
            booking.service_id
        ))
    })?;
    let time_slot = queries::get_time_slot(conn, &booking.time_slot_id)?.ok_or_else(|| {
        AppError::Unexpected(anyhow::anyhow!(
            "booking {booking_id} references missing time slot {}",
            booking.time_slot_id
        ))
    })?;
    let client = queries::get_client_summary(conn, &booking.client_id)?;

    Ok(Some(BookingDetails {
        service: ServiceSummary {
            id: service.id,
            name: service.name,
            category: service.category,
            price: service.price,
        },
        time_slot,
        client,
        booking,
    }))
}

fn load_details(conn: &Connection, booking_id: &str) -> Result<BookingDetails, AppError> {
    get_booking_details(conn, booking_id)?.ok_or_else(|| {
        AppError::Unexpected(anyhow::anyhow!("booking {booking_id} vanished after commit"))
    })
}

pub fn list_client_bookings(conn: &Connection, client_id: &str) -> Result<Vec<Booking>, AppError> {
    Ok(queries::get_bookings_for_client(conn, client_id)?)
}

pub fn list_bookings(
    conn: &Connection,
    status: Option<BookingStatus>,
    limit: Option<i64>,
) -> Result<Vec<Booking>, AppError> {
    let limit = limit.unwrap_or(50).clamp(1, MAX_LIST_LIMIT);
    Ok(queries::get_all_bookings(conn, status.as_ref(), limit)?)
}

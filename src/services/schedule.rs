use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{GenerateRequest, NewTimeSlot, TimeSlot};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateOutcome {
    pub created: Vec<TimeSlot>,
    pub skipped: usize,
}

impl BulkCreateOutcome {
    fn new() -> Self {
        Self {
            created: vec![],
            skipped: 0,
        }
    }
}

pub const MAX_SLOTS_PER_REQUEST: usize = 1000;

/// Creates many slots at once. Slots that already exist are counted as
/// skipped; any invalid entry rejects the whole batch.
pub fn create_slots(conn: &mut Connection, slots: &[NewTimeSlot]) -> Result<BulkCreateOutcome, AppError> {
    if slots.is_empty() {
        return Err(AppError::validation("slots", "at least one slot is required"));
    }
    if slots.len() > MAX_SLOTS_PER_REQUEST {
        return Err(AppError::validation(
            "slots",
            format!("cannot create more than {MAX_SLOTS_PER_REQUEST} slots at once"),
        ));
    }
    for slot in slots {
        slot.validate()?;
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for slot in slots {
        ensure_service_exists(&tx, slot.service_id.as_deref())?;
    }

    let mut outcome = BulkCreateOutcome::new();
    for slot in slots {
        match queries::create_time_slot(&tx, slot)? {
            Some(created) => outcome.created.push(created),
            None => outcome.skipped += 1,
        }
    }
    tx.commit()?;

    tracing::info!(
        created = outcome.created.len(),
        skipped = outcome.skipped,
        "bulk slot creation"
    );
    Ok(outcome)
}

/// Cuts each weekday window into `slot_minutes` pieces for every date in the
/// range. Running it twice over the same range creates nothing new.
pub fn generate_slots(conn: &mut Connection, request: &GenerateRequest) -> Result<BulkCreateOutcome, AppError> {
    let windows = request.parse_windows()?;
    let service_id = request
        .service_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_service_exists(&tx, service_id)?;

    let mut outcome = BulkCreateOutcome::new();
    let mut date = request.start_date;
    while date <= request.end_date {
        for window in windows.iter().filter(|w| w.applies_to(date)) {
            for (start_time, end_time) in window.pieces(request.slot_minutes) {
                let slot = NewTimeSlot {
                    date,
                    start_time,
                    end_time,
                    is_available: true,
                    service_id: service_id.map(str::to_string),
                    max_bookings: request.max_bookings,
                };
                match queries::create_time_slot(&tx, &slot)? {
                    Some(created) => outcome.created.push(created),
                    None => outcome.skipped += 1,
                }
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    tx.commit()?;

    tracing::info!(
        start_date = %request.start_date,
        end_date = %request.end_date,
        created = outcome.created.len(),
        skipped = outcome.skipped,
        "generated slots from weekly template"
    );
    Ok(outcome)
}

pub fn list_slots(
    conn: &Connection,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<TimeSlot>, AppError> {
    if end_date < start_date {
        return Err(AppError::validation(
            "endDate",
            "endDate must not be before startDate",
        ));
    }
    Ok(queries::list_time_slots(conn, &start_date, &end_date)?)
}

pub fn set_availability(conn: &Connection, slot_id: &str, is_available: bool) -> Result<TimeSlot, AppError> {
    if !queries::set_slot_availability(conn, slot_id, is_available)? {
        return Err(AppError::NotFound("time slot".to_string()));
    }
    tracing::info!(slot_id, is_available, "slot availability toggled");

    queries::get_time_slot(conn, slot_id)?
        .ok_or_else(|| AppError::NotFound("time slot".to_string()))
}

/// Deletes a slot that has no live bookings.
pub fn delete_slot(conn: &mut Connection, slot_id: &str) -> Result<(), AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if queries::get_time_slot(&tx, slot_id)?.is_none() {
        return Err(AppError::NotFound("time slot".to_string()));
    }

    let active = queries::count_active_bookings_for_slot(&tx, slot_id)?;
    if active > 0 {
        return Err(AppError::conflict(
            "slot_has_bookings",
            format!("time slot has {active} active booking(s)"),
        ));
    }

    queries::delete_time_slot(&tx, slot_id)?;
    tx.commit()?;

    tracing::info!(slot_id, "slot deleted");
    Ok(())
}

fn ensure_service_exists(conn: &Connection, service_id: Option<&str>) -> Result<(), AppError> {
    if let Some(id) = service_id {
        if queries::get_service(conn, id)?.is_none() {
            return Err(AppError::NotFound(format!("service {id}")));
        }
    }
    Ok(())
}

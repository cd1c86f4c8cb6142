use std::collections::HashMap;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Booking, BookingStatus, Client, ClientSummary, NewTimeSlot, Service, SlotOccupancy, TimeSlot,
    DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT,
};

fn fmt_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn fmt_time(time: &NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn fmt_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn parse_datetime(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .with_context(|| format!("invalid stored timestamp: {s}"))
}

// ── Time Slots ──

const SLOT_COLUMNS: &str =
    "id, date, start_time, end_time, is_available, service_id, max_bookings, current_bookings";

/// Filter for the candidate-slot query feeding the availability search.
#[derive(Debug, Clone)]
pub struct SlotQuery<'a> {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub service_id: Option<&'a str>,
}

/// Inserts a slot, returning `None` when an identical
/// (date, start, end, service) slot already exists.
pub fn create_time_slot(conn: &Connection, slot: &NewTimeSlot) -> anyhow::Result<Option<TimeSlot>> {
    let id = uuid::Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO time_slots (id, date, start_time, end_time, is_available, service_id, max_bookings, current_bookings)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
         ON CONFLICT DO NOTHING",
        params![
            id,
            fmt_date(&slot.date),
            fmt_time(&slot.start_time),
            fmt_time(&slot.end_time),
            slot.is_available,
            slot.service_id,
            slot.max_bookings,
        ],
    )?;

    if inserted == 0 {
        return Ok(None);
    }

    Ok(Some(TimeSlot {
        id,
        date: slot.date,
        start_time: slot.start_time,
        end_time: slot.end_time,
        is_available: slot.is_available,
        service_id: slot.service_id.clone(),
        max_bookings: slot.max_bookings,
        current_bookings: 0,
    }))
}

pub fn get_time_slot(conn: &Connection, id: &str) -> anyhow::Result<Option<TimeSlot>> {
    let sql = format!("SELECT {SLOT_COLUMNS} FROM time_slots WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_time_slot_row(row)))
        .optional()?;

    result.transpose()
}

pub fn list_time_slots(
    conn: &Connection,
    start_date: &NaiveDate,
    end_date: &NaiveDate,
) -> anyhow::Result<Vec<TimeSlot>> {
    let sql = format!(
        "SELECT {SLOT_COLUMNS} FROM time_slots
         WHERE date >= ?1 AND date <= ?2
         ORDER BY date ASC, start_time ASC, end_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![fmt_date(start_date), fmt_date(end_date)], |row| {
        Ok(parse_time_slot_row(row))
    })?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

/// Available, not-yet-full slots in the date range, ordered by (date, start).
/// With a service, only slots bound to it or open to any service qualify.
pub fn find_candidate_slots(conn: &Connection, query: &SlotQuery) -> anyhow::Result<Vec<TimeSlot>> {
    let sql = format!(
        "SELECT {SLOT_COLUMNS} FROM time_slots
         WHERE date >= ?1 AND date <= ?2
           AND is_available = 1
           AND current_bookings < max_bookings
           AND (?3 IS NULL OR service_id IS NULL OR service_id = ?3)
         ORDER BY date ASC, start_time ASC, end_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            fmt_date(&query.start_date),
            fmt_date(&query.end_date),
            query.service_id,
        ],
        |row| Ok(parse_time_slot_row(row)),
    )?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

/// Slots on `date` starting between `from` and `to` (inclusive), ordered by
/// start time, each with the ids of its non-cancelled bookings.
pub fn get_day_slots(
    conn: &Connection,
    date: &NaiveDate,
    from: &NaiveTime,
    to: &NaiveTime,
) -> anyhow::Result<Vec<SlotOccupancy>> {
    let date_str = fmt_date(date);
    let from_str = fmt_time(from);
    let to_str = fmt_time(to);

    let sql = format!(
        "SELECT {SLOT_COLUMNS} FROM time_slots
         WHERE date = ?1 AND start_time >= ?2 AND start_time <= ?3
         ORDER BY start_time ASC, end_time ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![date_str, from_str, to_str], |row| {
        Ok(parse_time_slot_row(row))
    })?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }

    let mut stmt = conn.prepare(
        "SELECT b.time_slot_id, b.id FROM bookings b
         INNER JOIN time_slots s ON s.id = b.time_slot_id
         WHERE s.date = ?1 AND s.start_time >= ?2 AND s.start_time <= ?3
           AND b.status != 'cancelled'
         ORDER BY b.created_at ASC",
    )?;
    let rows = stmt.query_map(params![date_str, from_str, to_str], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut bookings_by_slot: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (slot_id, booking_id) = row?;
        bookings_by_slot.entry(slot_id).or_default().push(booking_id);
    }

    Ok(slots
        .into_iter()
        .map(|slot| {
            let active_booking_ids = bookings_by_slot.remove(&slot.id).unwrap_or_default();
            SlotOccupancy {
                slot,
                active_booking_ids,
            }
        })
        .collect())
}

pub fn set_slot_availability(conn: &Connection, id: &str, is_available: bool) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE time_slots SET is_available = ?1, updated_at = datetime('now', 'localtime') WHERE id = ?2",
        params![is_available, id],
    )?;
    Ok(count > 0)
}

/// Claims one unit of capacity. Returns `false` when the slot is already full.
pub fn increment_slot_bookings(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE time_slots
         SET current_bookings = current_bookings + 1, updated_at = datetime('now', 'localtime')
         WHERE id = ?1 AND current_bookings < max_bookings",
        params![id],
    )?;
    Ok(count > 0)
}

/// Releases one unit of capacity, never going below zero.
pub fn decrement_slot_bookings(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE time_slots
         SET current_bookings = MAX(current_bookings - 1, 0), updated_at = datetime('now', 'localtime')
         WHERE id = ?1",
        params![id],
    )?;
    Ok(count > 0)
}

pub fn count_active_bookings_for_slot(conn: &Connection, slot_id: &str) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE time_slot_id = ?1 AND status != 'cancelled'",
        params![slot_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn delete_time_slot(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    // Cancelled bookings would otherwise block the delete through the foreign key.
    conn.execute(
        "DELETE FROM bookings WHERE time_slot_id = ?1 AND status = 'cancelled'",
        params![id],
    )?;
    let count = conn.execute("DELETE FROM time_slots WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

fn parse_time_slot_row(row: &rusqlite::Row) -> anyhow::Result<TimeSlot> {
    let id: String = row.get(0)?;
    let date_str: String = row.get(1)?;
    let start_str: String = row.get(2)?;
    let end_str: String = row.get(3)?;
    let is_available: bool = row.get(4)?;
    let service_id: Option<String> = row.get(5)?;
    let max_bookings: i64 = row.get(6)?;
    let current_bookings: i64 = row.get(7)?;

    let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
        .with_context(|| format!("invalid stored date on slot {id}: {date_str}"))?;
    let start_time = crate::models::parse_time(&start_str)
        .with_context(|| format!("invalid stored start time on slot {id}"))?;
    let end_time = crate::models::parse_time(&end_str)
        .with_context(|| format!("invalid stored end time on slot {id}"))?;

    Ok(TimeSlot {
        id,
        date,
        start_time,
        end_time,
        is_available,
        service_id,
        max_bookings,
        current_bookings,
    })
}

// ── Services ──

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            "SELECT id, name, price, category, duration_minutes, is_active FROM services WHERE id = ?1",
            params![id],
            |row| {
                Ok(Service {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    price: row.get(2)?,
                    category: row.get(3)?,
                    duration_minutes: row.get(4)?,
                    is_active: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(service)
}

pub fn save_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, name, price, category, duration_minutes, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           price = excluded.price,
           category = excluded.category,
           duration_minutes = excluded.duration_minutes,
           is_active = excluded.is_active",
        params![
            service.id,
            service.name,
            service.price,
            service.category,
            service.duration_minutes,
            service.is_active,
        ],
    )?;
    Ok(())
}

// ── Clients ──

pub fn save_client(conn: &Connection, client: &Client) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO clients (id, first_name, last_name, email, phone)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           first_name = excluded.first_name,
           last_name = excluded.last_name,
           email = excluded.email,
           phone = excluded.phone",
        params![
            client.id,
            client.first_name,
            client.last_name,
            client.email,
            client.phone,
        ],
    )?;
    Ok(())
}

pub fn get_client_summary(conn: &Connection, id: &str) -> anyhow::Result<Option<ClientSummary>> {
    let client = conn
        .query_row(
            "SELECT id, first_name, last_name, email FROM clients WHERE id = ?1",
            params![id],
            |row| {
                Ok(ClientSummary {
                    id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    email: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(client)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, client_id, service_id, time_slot_id, status, booking_date, duration_minutes, total_price, client_notes, cancelled_at, cancelled_by, cancellation_reason, created_at, updated_at";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, client_id, service_id, time_slot_id, status, booking_date, duration_minutes, total_price, client_notes, cancelled_at, cancelled_by, cancellation_reason, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            booking.id,
            booking.client_id,
            booking.service_id,
            booking.time_slot_id,
            booking.status.as_str(),
            fmt_datetime(&booking.booking_date),
            booking.duration_minutes,
            booking.total_price,
            booking.client_notes,
            booking.cancelled_at.as_ref().map(fmt_datetime),
            booking.cancelled_by,
            booking.cancellation_reason,
            fmt_datetime(&booking.created_at),
            fmt_datetime(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_booking_row(row)))
        .optional()?;

    result.transpose()
}

pub fn has_active_booking(conn: &Connection, client_id: &str, slot_id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE client_id = ?1 AND time_slot_id = ?2 AND status != 'cancelled'",
        params![client_id, slot_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn mark_booking_cancelled(
    conn: &Connection,
    id: &str,
    cancelled_at: &NaiveDateTime,
    cancelled_by: &str,
    reason: Option<&str>,
) -> anyhow::Result<bool> {
    let at = fmt_datetime(cancelled_at);
    let count = conn.execute(
        "UPDATE bookings
         SET status = 'cancelled', cancelled_at = ?1, cancelled_by = ?2, cancellation_reason = ?3, updated_at = ?1
         WHERE id = ?4",
        params![at, cancelled_by, reason, id],
    )?;
    Ok(count > 0)
}

pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    status: &BookingStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), fmt_datetime(now), id],
    )?;
    Ok(count > 0)
}

/// Moves a cancelled booking back to a live status, dropping its cancellation record.
pub fn reinstate_booking(
    conn: &Connection,
    id: &str,
    status: &BookingStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET status = ?1, cancelled_at = NULL, cancelled_by = NULL, cancellation_reason = NULL, updated_at = ?2
         WHERE id = ?3",
        params![status.as_str(), fmt_datetime(now), id],
    )?;
    Ok(count > 0)
}

pub fn get_bookings_for_client(conn: &Connection, client_id: &str) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE client_id = ?1 ORDER BY booking_date DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![client_id], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn get_all_bookings(
    conn: &Connection,
    status_filter: Option<&BookingStatus>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1 ORDER BY booking_date DESC LIMIT ?2"
            ),
            vec![
                Box::new(status.as_str()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
        None => (
            format!("SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY booking_date DESC LIMIT ?1"),
            vec![Box::new(limit) as Box<dyn rusqlite::types::ToSql>],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let id: String = row.get(0)?;
    let status_str: String = row.get(4)?;
    let booking_date_str: String = row.get(5)?;
    let cancelled_at_str: Option<String> = row.get(9)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;

    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown status on booking {id}: {status_str}"))?;

    Ok(Booking {
        client_id: row.get(1)?,
        service_id: row.get(2)?,
        time_slot_id: row.get(3)?,
        status,
        booking_date: parse_datetime(&booking_date_str)?,
        duration_minutes: row.get(6)?,
        total_price: row.get(7)?,
        client_notes: row.get(8)?,
        cancelled_at: cancelled_at_str.as_deref().map(parse_datetime).transpose()?,
        cancelled_by: row.get(10)?,
        cancellation_reason: row.get(11)?,
        created_at: parse_datetime(&created_at_str)?,
        updated_at: parse_datetime(&updated_at_str)?,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn add_slot(conn: &Connection, date: &str, start: &str, end: &str) -> TimeSlot {
        create_time_slot(conn, &NewTimeSlot::new(d(date), t(start), t(end)))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_create_and_get_slot() {
        let conn = setup_db();
        let slot = add_slot(&conn, "2025-06-16", "09:00", "10:30");

        let loaded = get_time_slot(&conn, &slot.id).unwrap().unwrap();
        assert_eq!(loaded, slot);
        assert!(get_time_slot(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_slot_is_ignored() {
        let conn = setup_db();
        add_slot(&conn, "2025-06-16", "09:00", "10:00");

        let again = NewTimeSlot::new(d("2025-06-16"), t("09:00"), t("10:00"));
        assert!(create_time_slot(&conn, &again).unwrap().is_none());

        // Same times bound to a service is a different slot
        conn.execute(
            "INSERT INTO services (id, name, price, category) VALUES ('svc', 'Cut', 30, 'coiffure')",
            [],
        )
        .unwrap();
        let mut bound = again.clone();
        bound.service_id = Some("svc".to_string());
        assert!(create_time_slot(&conn, &bound).unwrap().is_some());
        assert!(create_time_slot(&conn, &bound).unwrap().is_none());
    }

    #[test]
    fn test_find_candidate_slots_filters() {
        let conn = setup_db();
        let open = add_slot(&conn, "2025-06-16", "09:00", "10:00");
        let disabled = add_slot(&conn, "2025-06-16", "10:00", "11:00");
        let full = add_slot(&conn, "2025-06-17", "09:00", "10:00");
        add_slot(&conn, "2025-06-20", "09:00", "10:00");

        set_slot_availability(&conn, &disabled.id, false).unwrap();
        increment_slot_bookings(&conn, &full.id).unwrap();

        let query = SlotQuery {
            start_date: d("2025-06-16"),
            end_date: d("2025-06-17"),
            service_id: None,
        };
        let slots = find_candidate_slots(&conn, &query).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, open.id);
    }

    #[test]
    fn test_counter_never_leaves_bounds() {
        let conn = setup_db();
        let slot = add_slot(&conn, "2025-06-16", "09:00", "10:00");

        assert!(increment_slot_bookings(&conn, &slot.id).unwrap());
        assert!(!increment_slot_bookings(&conn, &slot.id).unwrap());
        assert_eq!(get_time_slot(&conn, &slot.id).unwrap().unwrap().current_bookings, 1);

        decrement_slot_bookings(&conn, &slot.id).unwrap();
        decrement_slot_bookings(&conn, &slot.id).unwrap();
        assert_eq!(get_time_slot(&conn, &slot.id).unwrap().unwrap().current_bookings, 0);
    }

    #[test]
    fn test_day_slots_ordered_and_bounded() {
        let conn = setup_db();
        add_slot(&conn, "2025-06-16", "11:00", "12:00");
        add_slot(&conn, "2025-06-16", "09:00", "10:00");
        add_slot(&conn, "2025-06-16", "10:00", "11:00");
        add_slot(&conn, "2025-06-17", "09:30", "10:00");

        let day = get_day_slots(&conn, &d("2025-06-16"), &t("09:30"), &t("23:59")).unwrap();
        let starts: Vec<_> = day.iter().map(|o| o.slot.start_time).collect();
        assert_eq!(starts, vec![t("10:00"), t("11:00")]);
        assert!(day.iter().all(SlotOccupancy::is_free));
    }
}

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::db::queries::{self, SlotQuery};
use crate::errors::AppError;
use crate::models::{self, AvailableSlot, SlotOccupancy, TimeSlot};

fn day_start() -> NaiveTime {
    NaiveTime::MIN
}

fn day_end() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
}

/// What a slot (or chain of slots) has to fit.
#[derive(Debug, Clone, Copy)]
pub struct ServiceRequirement<'a> {
    pub service_id: Option<&'a str>,
    pub duration_minutes: i64,
}

/// Every slot of a single day with its live bookings, ordered by start time.
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    slots: Vec<SlotOccupancy>,
}

impl DaySchedule {
    pub fn new(mut slots: Vec<SlotOccupancy>) -> Self {
        slots.sort_by(|a, b| {
            (a.slot.date, a.slot.start_time, a.slot.end_time, &a.slot.id).cmp(&(
                b.slot.date,
                b.slot.start_time,
                b.slot.end_time,
                &b.slot.id,
            ))
        });
        Self { slots }
    }

    fn occupancy(&self, slot_id: &str) -> Option<&SlotOccupancy> {
        self.slots.iter().find(|o| o.slot.id == slot_id)
    }

    /// Whether `slot` can host the service, alone or as the head of a chain.
    ///
    /// A service that fits in the slot only needs the slot itself to be free.
    /// A longer service needs a run of free, available slots starting at this
    /// one, each beginning exactly where the previous ends, whose combined span
    /// reaches the required duration.
    pub fn can_accommodate(&self, slot: &TimeSlot, requirement: &ServiceRequirement) -> bool {
        let Some(head) = self.occupancy(&slot.id) else {
            tracing::debug!(slot_id = %slot.id, "slot missing from day schedule");
            return false;
        };

        let span = head.slot.span_minutes();
        if requirement.duration_minutes <= span {
            let free = head.is_free();
            tracing::trace!(
                span,
                bookings = head.active_booking_ids.len(),
                free,
                "single-slot check"
            );
            return free;
        }

        self.chain_covers(head, requirement)
    }

    fn chain_covers(&self, head: &SlotOccupancy, requirement: &ServiceRequirement) -> bool {
        if !head.slot.is_available || !head.is_free() {
            tracing::trace!(slot_id = %head.slot.id, "chain head is not free");
            return false;
        }

        let mut covered = head.slot.span_minutes();
        let mut cursor = head.slot.end_time;
        let mut links = 1;

        while covered < requirement.duration_minutes {
            let mut adjacent = self
                .slots
                .iter()
                .filter(|o| o.slot.date == head.slot.date && o.slot.start_time == cursor)
                .peekable();

            if adjacent.peek().is_none() {
                tracing::debug!(
                    at = %cursor,
                    covered,
                    required = requirement.duration_minutes,
                    "chain broken by gap"
                );
                return false;
            }

            let next = adjacent.find(|o| {
                o.slot.is_available && o.is_free() && o.slot.is_open_to(requirement.service_id)
            });
            let Some(next) = next else {
                tracing::debug!(
                    at = %cursor,
                    covered,
                    required = requirement.duration_minutes,
                    "chain broken by unavailable or booked slot"
                );
                return false;
            };

            covered += next.slot.span_minutes();
            cursor = next.slot.end_time;
            links += 1;
            tracing::trace!(slot_id = %next.slot.id, covered, links, "chained slot");
        }

        tracing::debug!(covered, links, "chain covers service");
        true
    }
}

/// Checks a single slot against the stored calendar for its day.
#[tracing::instrument(
    skip(conn, slot, requirement),
    fields(slot_id = %slot.id, date = %slot.date, required = requirement.duration_minutes)
)]
pub fn can_accommodate(
    conn: &Connection,
    slot: &TimeSlot,
    requirement: &ServiceRequirement,
) -> anyhow::Result<bool> {
    let day = queries::get_day_slots(conn, &slot.date, &slot.start_time, &day_end())?;
    Ok(DaySchedule::new(day).can_accommodate(slot, requirement))
}

/// Keeps the candidates that can host the service, preserving their order.
#[tracing::instrument(
    skip(conn, candidates, requirement),
    fields(candidates = candidates.len(), required = requirement.duration_minutes)
)]
pub fn compute_available_slots(
    conn: &Connection,
    candidates: Vec<TimeSlot>,
    requirement: &ServiceRequirement,
) -> anyhow::Result<Vec<AvailableSlot>> {
    let mut days: BTreeMap<NaiveDate, DaySchedule> = BTreeMap::new();
    let mut available = vec![];

    for slot in candidates {
        if !days.contains_key(&slot.date) {
            let day = queries::get_day_slots(conn, &slot.date, &day_start(), &day_end())?;
            days.insert(slot.date, DaySchedule::new(day));
        }
        let fits = days
            .get(&slot.date)
            .map(|day| {
                let _span = tracing::trace_span!("candidate", slot_id = %slot.id).entered();
                day.can_accommodate(&slot, requirement)
            })
            .unwrap_or(false);

        if !fits {
            continue;
        }
        let slot_id = slot.id.clone();
        match AvailableSlot::new(slot, requirement.duration_minutes) {
            Some(found) => available.push(found),
            None => tracing::debug!(%slot_id, "service would run past midnight"),
        }
    }

    Ok(available)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub service_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    pub slots: Vec<AvailableSlot>,
    pub grouped_by_date: BTreeMap<NaiveDate, Vec<AvailableSlot>>,
    pub total_slots: usize,
    pub service_duration: i64,
}

impl AvailabilityReport {
    fn new(slots: Vec<AvailableSlot>, service_duration: i64) -> Self {
        let mut grouped_by_date: BTreeMap<NaiveDate, Vec<AvailableSlot>> = BTreeMap::new();
        for slot in &slots {
            grouped_by_date
                .entry(slot.slot.date)
                .or_default()
                .push(slot.clone());
        }
        Self {
            total_slots: slots.len(),
            slots,
            grouped_by_date,
            service_duration,
        }
    }
}

/// Resolves the search window: one explicit date, an explicit range (either end
/// optional), or today through the configured horizon.
pub fn resolve_window(
    request: &AvailabilityRequest,
    today: NaiveDate,
    horizon_days: i64,
) -> Result<(NaiveDate, NaiveDate), AppError> {
    if let Some(date) = request.date {
        return Ok((date, date));
    }

    let start = request.start_date.unwrap_or(today);
    let end = match request.end_date {
        Some(end) => end,
        None => models::add_days(start, horizon_days).ok_or_else(|| {
            AppError::validation("startDate", "startDate is too far in the future")
        })?,
    };
    if end < start {
        return Err(AppError::validation(
            "endDate",
            "endDate must not be before startDate",
        ));
    }
    Ok((start, end))
}

pub fn find_available_slots(
    conn: &Connection,
    config: &AppConfig,
    request: &AvailabilityRequest,
    today: NaiveDate,
) -> Result<AvailabilityReport, AppError> {
    let service_id = request.service_id.as_deref().filter(|id| !id.trim().is_empty());

    let duration_minutes = match service_id {
        Some(id) => {
            let service = queries::get_service(conn, id)?
                .filter(|s| s.is_active)
                .ok_or_else(|| AppError::NotFound("service".to_string()))?;
            config.durations.resolve(&service)
        }
        None => config.durations.fallback(),
    };

    let (start_date, end_date) = resolve_window(request, today, config.search_horizon_days)?;

    let candidates = queries::find_candidate_slots(
        conn,
        &SlotQuery {
            start_date,
            end_date,
            service_id,
        },
    )?;
    let candidate_count = candidates.len();

    let requirement = ServiceRequirement {
        service_id,
        duration_minutes,
    };
    let slots = compute_available_slots(conn, candidates, &requirement)?;

    tracing::info!(
        service_id = service_id.unwrap_or("-"),
        %start_date,
        %end_date,
        duration_minutes,
        candidates = candidate_count,
        available = slots.len(),
        "computed availability"
    );

    Ok(AvailabilityReport::new(slots, duration_minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{NewTimeSlot, Service};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn occ(id: &str, start: &str, end: &str, bookings: usize) -> SlotOccupancy {
        SlotOccupancy {
            slot: TimeSlot {
                id: id.to_string(),
                date: d("2025-06-16"),
                start_time: t(start),
                end_time: t(end),
                is_available: true,
                service_id: None,
                max_bookings: 1,
                current_bookings: bookings as i64,
            },
            active_booking_ids: (0..bookings).map(|i| format!("{id}-b{i}")).collect(),
        }
    }

    fn needs(minutes: i64) -> ServiceRequirement<'static> {
        ServiceRequirement {
            service_id: None,
            duration_minutes: minutes,
        }
    }

    fn check(day: &DaySchedule, id: &str, minutes: i64) -> bool {
        let slot = day.occupancy(id).unwrap().slot.clone();
        day.can_accommodate(&slot, &needs(minutes))
    }

    #[test]
    fn test_single_slot_free() {
        let day = DaySchedule::new(vec![occ("a", "09:00", "10:30", 0)]);
        assert!(check(&day, "a", 60));
    }

    #[test]
    fn test_single_slot_booked() {
        let day = DaySchedule::new(vec![occ("a", "09:00", "10:30", 1)]);
        assert!(!check(&day, "a", 60));
    }

    #[test]
    fn test_exact_fit_is_single_slot() {
        let day = DaySchedule::new(vec![occ("a", "09:00", "10:30", 0)]);
        assert!(check(&day, "a", 90));
    }

    #[test]
    fn test_single_slot_ignores_neighbours() {
        let mut blocked = occ("b", "10:30", "12:00", 1);
        blocked.slot.is_available = false;
        let day = DaySchedule::new(vec![occ("a", "09:00", "10:30", 0), blocked]);
        assert!(check(&day, "a", 60));
    }

    #[test]
    fn test_chain_of_two_covers_service() {
        let day = DaySchedule::new(vec![
            occ("a", "09:00", "10:30", 0),
            occ("b", "10:30", "12:00", 0),
        ]);
        assert!(check(&day, "a", 120));
    }

    #[test]
    fn test_chain_broken_by_unavailable_slot() {
        let mut closed = occ("b", "10:30", "12:00", 0);
        closed.slot.is_available = false;
        let day = DaySchedule::new(vec![occ("a", "09:00", "10:30", 0), closed]);
        assert!(!check(&day, "a", 120));
    }

    #[test]
    fn test_chain_broken_by_booked_slot() {
        let day = DaySchedule::new(vec![
            occ("a", "09:00", "10:00", 0),
            occ("b", "10:00", "11:00", 1),
            occ("c", "11:00", "12:00", 0),
        ]);
        assert!(!check(&day, "a", 150));
    }

    #[test]
    fn test_chain_broken_by_one_minute_gap() {
        let day = DaySchedule::new(vec![
            occ("a", "09:00", "10:00", 0),
            occ("b", "10:01", "11:00", 0),
        ]);
        assert!(!check(&day, "a", 90));
    }

    #[test]
    fn test_chain_rejects_overlapping_next_slot() {
        let day = DaySchedule::new(vec![
            occ("a", "09:00", "10:00", 0),
            occ("b", "09:59", "11:00", 0),
        ]);
        assert!(!check(&day, "a", 90));
    }

    #[test]
    fn test_chain_head_must_be_free() {
        let day = DaySchedule::new(vec![
            occ("a", "09:00", "10:00", 1),
            occ("b", "10:00", "11:00", 0),
        ]);
        assert!(!check(&day, "a", 90));
    }

    #[test]
    fn test_chain_runs_out_at_end_of_day() {
        let day = DaySchedule::new(vec![
            occ("a", "16:00", "17:00", 0),
            occ("b", "17:00", "18:00", 0),
        ]);
        assert!(check(&day, "a", 120));
        assert!(!check(&day, "a", 121));
    }

    #[test]
    fn test_chain_of_three_short_slots() {
        let day = DaySchedule::new(vec![
            occ("c", "10:00", "10:30", 0),
            occ("a", "09:00", "09:30", 0),
            occ("b", "09:30", "10:00", 0),
        ]);
        assert!(check(&day, "a", 90));
        assert!(!check(&day, "b", 90));
    }

    #[test]
    fn test_chain_skips_slot_reserved_for_other_service() {
        let mut other = occ("b", "10:00", "11:00", 0);
        other.slot.service_id = Some("svc-other".to_string());
        let day = DaySchedule::new(vec![occ("a", "09:00", "10:00", 0), other]);

        let slot = day.occupancy("a").unwrap().slot.clone();
        let requirement = ServiceRequirement {
            service_id: Some("svc-mine"),
            duration_minutes: 120,
        };
        assert!(!day.can_accommodate(&slot, &requirement));
    }

    #[test]
    fn test_chain_uses_parallel_slot_when_first_is_taken() {
        let day = DaySchedule::new(vec![
            occ("a", "09:00", "10:00", 0),
            occ("b1", "10:00", "11:00", 1),
            occ("b2", "10:00", "11:00", 0),
        ]);
        assert!(check(&day, "a", 120));
    }

    #[test]
    fn test_unknown_slot_is_rejected() {
        let day = DaySchedule::new(vec![occ("a", "09:00", "10:00", 0)]);
        let stranger = occ("z", "09:00", "10:00", 0).slot;
        assert!(!day.can_accommodate(&stranger, &needs(30)));
    }

    // ── Window resolution ──

    #[test]
    fn test_window_defaults_to_horizon() {
        let today = d("2025-06-16");
        let (start, end) = resolve_window(&AvailabilityRequest::default(), today, 30).unwrap();
        assert_eq!(start, today);
        assert_eq!(end, d("2025-07-16"));
    }

    #[test]
    fn test_window_single_date_wins() {
        let request = AvailabilityRequest {
            date: Some(d("2025-06-20")),
            start_date: Some(d("2025-06-01")),
            ..Default::default()
        };
        let window = resolve_window(&request, d("2025-06-16"), 30).unwrap();
        assert_eq!(window, (d("2025-06-20"), d("2025-06-20")));
    }

    #[test]
    fn test_window_reversed_range_rejected() {
        let request = AvailabilityRequest {
            start_date: Some(d("2025-06-20")),
            end_date: Some(d("2025-06-10")),
            ..Default::default()
        };
        assert!(matches!(
            resolve_window(&request, d("2025-06-16"), 30),
            Err(AppError::Validation { field: "endDate", .. })
        ));
    }

    #[test]
    fn test_window_past_calendar_end_rejected() {
        let request = AvailabilityRequest {
            start_date: Some(NaiveDate::MAX),
            ..Default::default()
        };
        assert!(matches!(
            resolve_window(&request, d("2025-06-16"), 30),
            Err(AppError::Validation { field: "startDate", .. })
        ));

        // An explicit end needs no arithmetic
        let request = AvailabilityRequest {
            start_date: Some(NaiveDate::MAX),
            end_date: Some(NaiveDate::MAX),
            ..Default::default()
        };
        assert_eq!(
            resolve_window(&request, d("2025-06-16"), 30).unwrap(),
            (NaiveDate::MAX, NaiveDate::MAX)
        );
    }

    // ── Against the database ──

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn add_slot(conn: &Connection, date: &str, start: &str, end: &str) -> TimeSlot {
        queries::create_time_slot(conn, &NewTimeSlot::new(d(date), t(start), t(end)))
            .unwrap()
            .unwrap()
    }

    fn add_service(conn: &Connection, id: &str, category: &str, duration: Option<i64>, active: bool) {
        queries::save_service(
            conn,
            &Service {
                id: id.to_string(),
                name: format!("Service {id}"),
                price: 40.0,
                category: category.to_string(),
                duration_minutes: duration,
                is_active: active,
            },
        )
        .unwrap();
    }

    fn book_slot(conn: &Connection, slot_id: &str, service_id: &str) {
        conn.execute(
            "INSERT INTO bookings (id, client_id, service_id, time_slot_id, status, booking_date, duration_minutes, total_price, created_at, updated_at)
             VALUES (?1, 'client-x', ?2, ?3, 'confirmed', '2025-06-16 09:00:00', 60, 40, '2025-06-01 10:00:00', '2025-06-01 10:00:00')",
            rusqlite::params![format!("b-{slot_id}"), service_id, slot_id],
        )
        .unwrap();
        queries::increment_slot_bookings(conn, slot_id).unwrap();
    }

    #[test]
    fn test_can_accommodate_reads_day_from_store() {
        let conn = setup_db();
        add_service(&conn, "svc", "coiffure", None, true);
        let first = add_slot(&conn, "2025-06-16", "09:00", "10:30");
        let second = add_slot(&conn, "2025-06-16", "10:30", "12:00");

        assert!(can_accommodate(&conn, &first, &needs(120)).unwrap());

        queries::set_slot_availability(&conn, &second.id, false).unwrap();
        assert!(!can_accommodate(&conn, &first, &needs(120)).unwrap());
        assert!(can_accommodate(&conn, &first, &needs(60)).unwrap());
    }

    #[test]
    fn test_compute_keeps_order_and_annotates_end_time() {
        let conn = setup_db();
        add_service(&conn, "svc", "coiffure", None, true);
        let a = add_slot(&conn, "2025-06-16", "09:00", "10:00");
        let b = add_slot(&conn, "2025-06-16", "10:00", "11:00");
        let c = add_slot(&conn, "2025-06-17", "09:00", "10:00");
        book_slot(&conn, &b.id, "svc");

        let candidates = vec![a.clone(), c.clone()];
        let available = compute_available_slots(&conn, candidates, &needs(90)).unwrap();

        // a cannot chain into the booked b; c has no successor at all
        assert!(available.is_empty());

        let available =
            compute_available_slots(&conn, vec![a.clone(), c.clone()], &needs(45)).unwrap();
        let ids: Vec<_> = available.iter().map(|s| s.slot.id.clone()).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert_eq!(available[0].service_end_time, t("09:45"));
    }

    #[test]
    fn test_find_available_slots_for_service() {
        let conn = setup_db();
        add_service(&conn, "color", "coloration", None, true);
        add_slot(&conn, "2025-06-16", "09:00", "10:00");
        add_slot(&conn, "2025-06-16", "10:00", "11:00");
        add_slot(&conn, "2025-06-16", "11:00", "12:00");

        let config = AppConfig::default();
        let request = AvailabilityRequest {
            date: Some(d("2025-06-16")),
            service_id: Some("color".to_string()),
            ..Default::default()
        };
        let report = find_available_slots(&conn, &config, &request, d("2025-06-16")).unwrap();

        // coloration takes 120 minutes: only 09:00 and 10:00 can start a 2-slot chain
        assert_eq!(report.service_duration, 120);
        assert_eq!(report.total_slots, 2);
        assert_eq!(report.slots[0].slot.start_time, t("09:00"));
        assert_eq!(report.slots[1].slot.start_time, t("10:00"));
        assert_eq!(report.grouped_by_date[&d("2025-06-16")].len(), 2);
    }

    #[test]
    fn test_find_available_slots_default_duration() {
        let conn = setup_db();
        add_slot(&conn, "2025-06-16", "09:00", "09:30");
        add_slot(&conn, "2025-06-16", "09:30", "10:00");
        add_slot(&conn, "2025-08-01", "09:00", "10:00");

        let config = AppConfig::default();
        let report =
            find_available_slots(&conn, &config, &AvailabilityRequest::default(), d("2025-06-16"))
                .unwrap();

        // 60 minute default; the August slot is beyond the 30 day horizon
        assert_eq!(report.service_duration, 60);
        assert_eq!(report.total_slots, 1);
        assert_eq!(report.slots[0].slot.start_time, t("09:00"));
    }

    #[test]
    fn test_find_available_slots_excludes_other_service_slots() {
        let conn = setup_db();
        add_service(&conn, "cut", "coiffure", Some(30), true);
        add_service(&conn, "nails", "manucure", None, true);
        let open = add_slot(&conn, "2025-06-16", "09:00", "10:00");
        let mut reserved = NewTimeSlot::new(d("2025-06-16"), t("10:00"), t("11:00"));
        reserved.service_id = Some("nails".to_string());
        queries::create_time_slot(&conn, &reserved).unwrap().unwrap();

        let request = AvailabilityRequest {
            date: Some(d("2025-06-16")),
            service_id: Some("cut".to_string()),
            ..Default::default()
        };
        let report =
            find_available_slots(&conn, &AppConfig::default(), &request, d("2025-06-16")).unwrap();
        assert_eq!(report.total_slots, 1);
        assert_eq!(report.slots[0].slot.id, open.id);
    }

    #[test]
    fn test_find_available_slots_unknown_or_inactive_service() {
        let conn = setup_db();
        add_service(&conn, "old", "soin", None, false);
        let config = AppConfig::default();

        for id in ["missing", "old"] {
            let request = AvailabilityRequest {
                service_id: Some(id.to_string()),
                ..Default::default()
            };
            let result = find_available_slots(&conn, &config, &request, d("2025-06-16"));
            assert!(matches!(result, Err(AppError::NotFound(_))));
        }
    }
}

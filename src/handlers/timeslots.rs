use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::auth::require_admin;
use super::{local_now, ApiResponse};
use crate::errors::AppError;
use crate::models::{self, GenerateRequest, NewTimeSlot, TimeSlot};
use crate::services::availability::{self, AvailabilityReport, AvailabilityRequest};
use crate::services::schedule::{self, BulkCreateOutcome};
use crate::state::AppState;

// GET /api/timeslots/available
pub async fn get_available(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AvailabilityRequest>, QueryRejection>,
) -> Result<Json<ApiResponse<AvailabilityReport>>, AppError> {
    let Query(request) = query?;
    let today = local_now().date();

    let report = {
        let db = state.db()?;
        availability::find_available_slots(&db, &state.config, &request, today)?
    };

    Ok(ApiResponse::ok(report))
}

// GET /api/timeslots
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<TimeSlot>>>, AppError> {
    require_admin(&headers, &state.config.admin_token)?;
    let Query(query) = query?;

    let start = query.start_date.unwrap_or_else(|| local_now().date());
    let end = match query.end_date {
        Some(end) => end,
        None => models::add_days(start, state.config.search_horizon_days).ok_or_else(|| {
            AppError::validation("startDate", "startDate is too far in the future")
        })?,
    };

    let slots = {
        let db = state.db()?;
        schedule::list_slots(&db, start, end)?
    };

    Ok(ApiResponse::ok(slots))
}

// POST /api/timeslots
#[derive(Deserialize)]
pub struct CreateSlotsRequest {
    pub slots: Vec<NewTimeSlot>,
}

pub async fn create_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateSlotsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<BulkCreateOutcome>>), AppError> {
    require_admin(&headers, &state.config.admin_token)?;
    let Json(body) = body?;

    let outcome = {
        let mut db = state.db()?;
        schedule::create_slots(&mut db, &body.slots)?
    };

    let message = format!(
        "{} slot(s) created, {} already existed",
        outcome.created.len(),
        outcome.skipped
    );
    Ok((StatusCode::CREATED, ApiResponse::with_message(outcome, message)))
}

// POST /api/timeslots/generate
pub async fn generate_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<BulkCreateOutcome>>), AppError> {
    require_admin(&headers, &state.config.admin_token)?;
    let Json(request) = body?;

    let outcome = {
        let mut db = state.db()?;
        schedule::generate_slots(&mut db, &request)?
    };

    let message = format!(
        "{} slot(s) generated, {} already existed",
        outcome.created.len(),
        outcome.skipped
    );
    Ok((StatusCode::CREATED, ApiResponse::with_message(outcome, message)))
}

// PUT /api/timeslots/:id/availability
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityToggle {
    pub is_available: bool,
}

pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<AvailabilityToggle>, JsonRejection>,
) -> Result<Json<ApiResponse<TimeSlot>>, AppError> {
    require_admin(&headers, &state.config.admin_token)?;
    let Json(body) = body?;

    let slot = {
        let db = state.db()?;
        schedule::set_availability(&db, &id, body.is_available)?
    };

    Ok(ApiResponse::ok(slot))
}

// DELETE /api/timeslots/:id
pub async fn delete_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    require_admin(&headers, &state.config.admin_token)?;

    {
        let mut db = state.db()?;
        schedule::delete_slot(&mut db, &id)?;
    }

    Ok(ApiResponse::with_message(
        serde_json::json!({ "id": id }),
        "time slot deleted",
    ))
}

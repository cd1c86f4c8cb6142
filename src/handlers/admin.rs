use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::auth::require_admin;
use super::{local_now, ApiResponse};
use crate::errors::AppError;
use crate::models::{Booking, BookingDetails, BookingStatus};
use crate::services::booking;
use crate::state::AppState;

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<BookingStatus>,
    pub limit: Option<i64>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<BookingsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Booking>>>, AppError> {
    require_admin(&headers, &state.config.admin_token)?;
    let Query(query) = query?;

    let bookings = {
        let db = state.db()?;
        booking::list_bookings(&db, query.status, query.limit)?
    };

    Ok(ApiResponse::ok(bookings))
}

// PUT /api/admin/bookings/:id/status
#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: BookingStatus,
}

pub async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<BookingDetails>>, AppError> {
    require_admin(&headers, &state.config.admin_token)?;
    let Json(body) = body?;

    let details = {
        let mut db = state.db()?;
        booking::update_booking_status(&mut db, &id, body.status, local_now())?
    };

    Ok(ApiResponse::with_message(
        details,
        format!("booking is now {}", body.status.as_str()),
    ))
}

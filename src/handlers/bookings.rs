use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use super::auth::client_id;
use super::{local_now, ApiResponse};
use crate::errors::AppError;
use crate::models::{Booking, BookingDetails};
use crate::services::booking::{self, CreateBookingRequest};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<BookingDetails>>), AppError> {
    let client_id = client_id(&headers)?;
    let Json(request) = body?;

    let details = {
        let mut db = state.db()?;
        booking::create_booking(
            &mut db,
            &state.config.durations,
            &client_id,
            &request,
            local_now(),
        )?
    };

    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message(details, "booking created"),
    ))
}

// GET /api/bookings
pub async fn list_my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Booking>>>, AppError> {
    let client_id = client_id(&headers)?;

    let bookings = {
        let db = state.db()?;
        booking::list_client_bookings(&db, &client_id)?
    };

    Ok(ApiResponse::ok(bookings))
}

// PUT /api/bookings/:id/cancel
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub cancellation_reason: Option<String>,
}

/// The body is optional: empty or `null` means no reason given, anything else
/// must be a valid [`CancelRequest`].
fn parse_cancel_body(raw: &[u8]) -> Result<CancelRequest, AppError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(CancelRequest::default());
    }
    let parsed: Option<CancelRequest> = serde_json::from_slice(raw)
        .map_err(|e| AppError::validation("body", format!("invalid cancellation body: {e}")))?;
    Ok(parsed.unwrap_or_default())
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<BookingDetails>>, AppError> {
    let client_id = client_id(&headers)?;
    let body = parse_cancel_body(&body)?;

    let details = {
        let mut db = state.db()?;
        booking::cancel_booking(
            &mut db,
            &id,
            &client_id,
            body.cancellation_reason.as_deref(),
            local_now(),
            state.config.cancellation_lead_hours,
        )?
    };

    Ok(ApiResponse::with_message(details, "booking cancelled"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_body_is_optional() {
        assert!(parse_cancel_body(b"").unwrap().cancellation_reason.is_none());
        assert!(parse_cancel_body(b"  \n").unwrap().cancellation_reason.is_none());
        assert!(parse_cancel_body(b"null").unwrap().cancellation_reason.is_none());
        assert!(parse_cancel_body(b"{}").unwrap().cancellation_reason.is_none());
        assert_eq!(
            parse_cancel_body(br#"{"cancellationReason":"sick"}"#)
                .unwrap()
                .cancellation_reason
                .as_deref(),
            Some("sick")
        );
    }

    #[test]
    fn test_cancel_body_rejects_malformed_json() {
        for raw in [&br#"{"cancellationReason": 42"#[..], br#"{"cancellationReason": 42}"#, b"[1"] {
            assert!(matches!(
                parse_cancel_body(raw),
                Err(AppError::Validation { field: "body", .. })
            ));
        }
    }
}

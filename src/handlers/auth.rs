use axum::http::HeaderMap;

use crate::errors::AppError;

/// Header carrying the authenticated client's id, set by the upstream auth layer.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

pub fn require_admin(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

pub fn client_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use subtle::ConstantTimeEq;

pub const ADMIN_API_KEY_HEADER: &str = "x-admin-api-key";

/// Operator routes: link lifecycle, corporation signings and admin creation.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = headers
        .get(ADMIN_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let expected = state.config.security.admin_api_key.as_bytes();
    match api_key {
        Some(key) if !expected.is_empty() && bool::from(key.as_bytes().ct_eq(expected)) => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::warn!("Failed admin authentication attempt");
            Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid or missing admin API key"
            )))
        }
    }
}

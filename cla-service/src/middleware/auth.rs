use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{
    AppState,
    models::{OrgKey, Role},
    services::{ManagerClaims, ServiceError},
};

/// Validates the bearer access token, checks the manager still exists on the
/// token's link, and stores the claims in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state.jwt.validate_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        AppError::from(ServiceError::InvalidToken)
    })?;

    // A removed or re-created manager must not keep using an older token.
    let record = state.store.find_record(&claims.org_key()).await?;
    let still_holds = record
        .as_ref()
        .and_then(|r| r.manager_by_email(&claims.email))
        .is_some_and(|m| {
            m.id == claims.sub && m.role == claims.role && m.corporation_id == claims.corporation_id
        });
    if !still_holds {
        tracing::debug!(user_id = %claims.sub, "Access token for a manager no longer on the link");
        return Err(ServiceError::InvalidToken.into());
    }

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Authenticated manager, taken from the claims `auth_middleware` stored.
#[derive(Debug, Clone)]
pub struct ManagerPrincipal(pub ManagerClaims);

impl ManagerPrincipal {
    pub fn org_key(&self) -> OrgKey {
        self.0.org_key()
    }

    pub fn email(&self) -> &str {
        &self.0.email
    }

    pub fn corporation_id(&self) -> &str {
        &self.0.corporation_id
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.0.role == Role::Admin {
            Ok(())
        } else {
            Err(ServiceError::NotCorpAdmin.into())
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ManagerPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ManagerClaims>()
            .cloned()
            .map(ManagerPrincipal)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not authenticated")))
    }
}

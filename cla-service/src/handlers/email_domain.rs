use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use service_core::error::AppError;

use crate::{
    AppState,
    dtos::{AddEmailDomainRequest, EmailDomainCodeRequest, EmailDomainsResponse, MessageResponse},
    middleware::ManagerPrincipal,
    utils::ValidatedJson,
};

pub async fn request_code(
    State(state): State<AppState>,
    principal: ManagerPrincipal,
    ValidatedJson(req): ValidatedJson<EmailDomainCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    principal.require_admin()?;

    state
        .signing_service
        .request_email_domain_code(&principal.org_key(), principal.email(), &req.email)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("A verification code has been sent")),
    ))
}

pub async fn add_domain(
    State(state): State<AppState>,
    principal: ManagerPrincipal,
    ValidatedJson(req): ValidatedJson<AddEmailDomainRequest>,
) -> Result<Json<EmailDomainsResponse>, AppError> {
    principal.require_admin()?;

    let email_domains = state
        .signing_service
        .add_email_domain(&principal.org_key(), principal.email(), &req.email, &req.code)
        .await?;

    Ok(Json(EmailDomainsResponse { email_domains }))
}

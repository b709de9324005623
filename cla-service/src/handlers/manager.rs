use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use service_core::error::AppError;

use crate::{
    AppState,
    dtos::{
        AddEmployeeManagersRequest, DeleteEmployeeManagersRequest, LinkPath, ListManagersQuery,
        LoginRequest, LoginResponse, ManagersResponse, MessageResponse, PasswordRetrievalRequest,
        ResetPasswordRequest, RetrievePasswordRequest,
    },
    middleware::ManagerPrincipal,
    models::{OrgKey, Role},
    services::NewManager,
    utils::{Password, ValidatedJson},
};

/// Password login; the access token is scoped to the link logged into.
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let key = OrgKey::new(req.platform, req.org_id, req.repo_id);
    let manager = state
        .manager_service
        .authenticate(&key, &req.user, &Password::new(req.password))
        .await?;

    let access_token = state
        .jwt
        .generate_access_token(&key, &manager)
        .map_err(AppError::InternalError)?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in(),
        manager,
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    principal: ManagerPrincipal,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .manager_service
        .reset_password(
            &principal.org_key(),
            principal.email(),
            &Password::new(req.old_password),
            &Password::new(req.new_password),
        )
        .await?;

    Ok(Json(MessageResponse::new("Password changed")))
}

pub async fn list_managers(
    State(state): State<AppState>,
    principal: ManagerPrincipal,
    Query(query): Query<ListManagersQuery>,
) -> Result<Json<ManagersResponse>, AppError> {
    let role = match query.role.as_deref() {
        Some(role) => role
            .parse::<Role>()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
        None => Role::Manager,
    };

    let managers = state
        .manager_service
        .list_managers(&principal.org_key(), role, principal.corporation_id())
        .await?;

    Ok(Json(ManagersResponse { managers }))
}

pub async fn add_employee_managers(
    State(state): State<AppState>,
    principal: ManagerPrincipal,
    ValidatedJson(req): ValidatedJson<AddEmployeeManagersRequest>,
) -> Result<impl IntoResponse, AppError> {
    principal.require_admin()?;

    let candidates: Vec<NewManager> = req
        .managers
        .into_iter()
        .map(|m| NewManager {
            name: m.name,
            email: m.email,
        })
        .collect();

    let managers = state
        .manager_service
        .add_employee_managers(&principal.org_key(), principal.email(), &candidates)
        .await?;

    Ok((StatusCode::CREATED, Json(ManagersResponse { managers })))
}

pub async fn delete_employee_managers(
    State(state): State<AppState>,
    principal: ManagerPrincipal,
    ValidatedJson(req): ValidatedJson<DeleteEmployeeManagersRequest>,
) -> Result<Json<ManagersResponse>, AppError> {
    principal.require_admin()?;

    let managers = state
        .manager_service
        .delete_employee_managers(&principal.org_key(), principal.email(), &req.emails)
        .await?;

    Ok(Json(ManagersResponse { managers }))
}

pub async fn list_employee_managers(
    State(state): State<AppState>,
    principal: ManagerPrincipal,
) -> Result<Json<ManagersResponse>, AppError> {
    principal.require_admin()?;

    let managers = state
        .manager_service
        .list_managers(&principal.org_key(), Role::Manager, principal.corporation_id())
        .await?;

    Ok(Json(ManagersResponse { managers }))
}

pub async fn request_password_retrieval(
    State(state): State<AppState>,
    Path(path): Path<LinkPath>,
    ValidatedJson(req): ValidatedJson<PasswordRetrievalRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .manager_service
        .request_password_retrieval(&path.key(), &req.email)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("A verification code has been sent")),
    ))
}

pub async fn retrieve_password(
    State(state): State<AppState>,
    Path(path): Path<LinkPath>,
    ValidatedJson(req): ValidatedJson<RetrievePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .manager_service
        .retrieve_password(&path.key(), &req.email, &req.code, &Password::new(req.new_password))
        .await?;

    Ok(Json(MessageResponse::new("Password changed")))
}

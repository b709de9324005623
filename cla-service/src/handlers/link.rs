//! Operator routes guarded by the admin API key: link lifecycle, corporation
//! signings and corporation administrators.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use service_core::error::AppError;

use crate::{
    AppState,
    dtos::{
        CorporationPath, CorporationResponse, CorporationsResponse, CreateAdminRequest, LinkPath,
        LinkResponse, SignCorporationRequest,
    },
    utils::ValidatedJson,
};

pub async fn open_link(
    State(state): State<AppState>,
    Path(path): Path<LinkPath>,
) -> Result<impl IntoResponse, AppError> {
    let key = path.key();
    let created = state.signing_service.open_link(&key).await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(LinkResponse {
            link: key.to_string(),
            created,
        }),
    ))
}

pub async fn close_link(
    State(state): State<AppState>,
    Path(path): Path<LinkPath>,
) -> Result<StatusCode, AppError> {
    state.signing_service.close_link(&path.key()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn sign_corporation(
    State(state): State<AppState>,
    Path(path): Path<LinkPath>,
    ValidatedJson(req): ValidatedJson<SignCorporationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let corp = state
        .signing_service
        .sign_as_corporation(&path.key(), &req.corporation_name, &req.admin_email, &req.admin_name)
        .await?;

    Ok((StatusCode::CREATED, Json(CorporationResponse::from(corp))))
}

pub async fn list_corporations(
    State(state): State<AppState>,
    Path(path): Path<LinkPath>,
) -> Result<Json<CorporationsResponse>, AppError> {
    let corporations = state.signing_service.list_corporations(&path.key()).await?;

    Ok(Json(CorporationsResponse {
        corporations: corporations.into_iter().map(CorporationResponse::from).collect(),
    }))
}

pub async fn remove_corporation(
    State(state): State<AppState>,
    Path(path): Path<CorporationPath>,
) -> Result<StatusCode, AppError> {
    state
        .signing_service
        .remove_corp_signing(&path.key(), &path.corp_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_admin(
    State(state): State<AppState>,
    Path(path): Path<LinkPath>,
    ValidatedJson(req): ValidatedJson<CreateAdminRequest>,
) -> Result<impl IntoResponse, AppError> {
    let admin = state
        .manager_service
        .create_admin(&path.key(), &req.email)
        .await?;

    Ok((StatusCode::CREATED, Json(admin)))
}

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, HeaderValue, Method, Request, header},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};
use service_core::{
    error::AppError,
    middleware::{
        metrics::metrics_middleware,
        rate_limit::{IpRateLimiter, create_ip_rate_limiter, ip_rate_limit_middleware},
        security_headers::security_headers_middleware,
        tracing::{REQUEST_ID_HEADER, request_id_middleware},
    },
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ClaConfig;
use crate::middleware::admin::ADMIN_API_KEY_HEADER;
use crate::services::{
    Clock, CodeStore, CorpSigningService, EmailProvider, JwtService, ManagerService, SigningStore,
    VerificationCodeIssuer,
};

#[derive(Clone)]
pub struct AppState {
    pub config: ClaConfig,
    pub store: Arc<dyn SigningStore>,
    pub jwt: JwtService,
    pub clock: Arc<dyn Clock>,
    pub manager_service: ManagerService,
    pub signing_service: CorpSigningService,
    pub login_rate_limiter: IpRateLimiter,
    pub password_retrieval_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wires the services over the given store, code store, email provider and clock.
    pub fn new(
        config: ClaConfig,
        store: Arc<dyn SigningStore>,
        code_store: Arc<dyn CodeStore>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codes = VerificationCodeIssuer::new(
            code_store,
            clock.clone(),
            config.signing.verification_code_ttl(),
            config.signing.max_failed_login(),
        );

        let manager_service = ManagerService::new(
            store.clone(),
            codes.clone(),
            email.clone(),
            clock.clone(),
            &config.signing,
            config.cla_platform_url.clone(),
        );
        let signing_service =
            CorpSigningService::new(store.clone(), codes, email, clock.clone(), &config.signing);

        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );
        let password_retrieval_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.password_retrieval_attempts,
            config.rate_limit.password_retrieval_window_seconds,
        );

        Self {
            jwt: JwtService::new(&config.jwt, clock.clone()),
            config,
            store,
            clock,
            manager_service,
            signing_service,
            login_rate_limiter,
            password_retrieval_rate_limiter,
        }
    }
}

/// Operator routes under a link prefix; mounted for org-wide and per-repo links.
fn link_routes(prefix: &str) -> Router<AppState> {
    Router::new()
        .route(
            prefix,
            put(handlers::link::open_link).delete(handlers::link::close_link),
        )
        .route(
            &format!("{}/corporations", prefix),
            get(handlers::link::list_corporations).post(handlers::link::sign_corporation),
        )
        .route(
            &format!("{}/corporations/:corp_id", prefix),
            axum::routing::delete(handlers::link::remove_corporation),
        )
        .route(
            &format!("{}/corporation-manager", prefix),
            post(handlers::link::create_admin),
        )
}

/// Anonymous routes; one IP limiter is shared by every link prefix.
fn password_retrieval_routes(prefix: &str, limiter: &IpRateLimiter) -> Router<AppState> {
    Router::new()
        .route(prefix, post(handlers::manager::request_password_retrieval))
        .route(
            &format!("{}/reset", prefix),
            post(handlers::manager::retrieve_password),
        )
        .layer(from_fn_with_state(limiter.clone(), ip_rate_limit_middleware))
}

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .merge(link_routes("/links/:platform/:org_id"))
        .merge(link_routes("/links/:platform/:org_id/repos/:repo_id"))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let login_route = Router::new()
        .route("/corporation-manager/auth", post(handlers::manager::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let manager_routes = Router::new()
        .route(
            "/corporation-manager",
            put(handlers::manager::reset_password),
        )
        .route(
            "/corporation-managers",
            get(handlers::manager::list_managers),
        )
        .route(
            "/employee-managers",
            get(handlers::manager::list_employee_managers)
                .post(handlers::manager::add_employee_managers)
                .delete(handlers::manager::delete_employee_managers),
        )
        .route(
            "/corp-email-domains/code",
            post(handlers::email_domain::request_code),
        )
        .route(
            "/corp-email-domains",
            post(handlers::email_domain::add_domain),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let body_limit = usize::try_from(state.config.signing.max_size_of_cla_content)
        .unwrap_or(2 << 20);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(password_retrieval_routes(
            "/password-retrieval/:platform/:org_id",
            &state.password_retrieval_rate_limiter,
        ))
        .merge(password_retrieval_routes(
            "/password-retrieval/:platform/:org_id/repos/:repo_id",
            &state.password_retrieval_rate_limiter,
        ))
        .merge(login_route)
        .merge(admin_routes)
        .merge(manager_routes)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .map(|o| {
                            o.parse::<HeaderValue>().unwrap_or_else(|e| {
                                tracing::error!(
                                    "Invalid CORS origin '{}': {}. Using fallback.",
                                    o,
                                    e
                                );
                                HeaderValue::from_static("*")
                            })
                        })
                        .collect::<Vec<HeaderValue>>(),
                )
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(ADMIN_API_KEY_HEADER),
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Signing store health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "checks": {
            "mongodb": "up"
        }
    })))
}

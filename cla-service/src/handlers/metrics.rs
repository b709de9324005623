use service_core::axum::response::IntoResponse;

pub async fn metrics() -> impl IntoResponse {
    service_core::observability::render_metrics()
}

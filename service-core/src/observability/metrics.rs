use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init_metrics() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                // A recorder installed by someone else; keep an unregistered handle so
                // rendering still works.
                tracing::warn!(error = %e, "Prometheus recorder already installed");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Renders the current metrics in the Prometheus text format.
pub fn render_metrics() -> String {
    match HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics recorder not initialized\n".to_string(),
    }
}

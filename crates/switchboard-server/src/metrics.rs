//! Prometheus metrics recorder and `/metrics` endpoint handler.

pub use metrics_exporter_prometheus::PrometheusHandle;
pub use switchboard_broker::metric_names::*;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything records.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders nothing; for tests and embedders that do not export metrics.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

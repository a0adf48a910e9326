//! Prometheus recorder for the counters emitted by the library crates.
//!
//! Metric names live next to the code that records them:
//! [`hotshop_cache::metrics::names`] and [`hotshop_seckill::metrics::names`].

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter.
///
/// With `listen` set, the exporter serves its own scrape endpoint; this must
/// run inside a Tokio runtime. Returns `true` if a recorder was installed.
pub fn init_metrics(config: &MetricsConfig) -> bool {
    if !config.enabled {
        tracing::info!("Metrics disabled");
        return false;
    }
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    let builder = PrometheusBuilder::new();
    let installed = match config.listen.as_deref() {
        Some(listen) => {
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::error!(listen, error = %e, "Invalid metrics listen address");
                    return false;
                }
            };
            builder.with_http_listener(addr).install().map(|()| {
                tracing::info!(%addr, "Prometheus scrape endpoint listening");
            })
        }
        None => builder.install_recorder().map(|handle| {
            let _ = PROMETHEUS_HANDLE.set(handle);
            tracing::info!("Prometheus metrics initialized");
        }),
    };

    match installed {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` unless the recorder was installed without a listener.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

/// Serve `router` on an already bound listener, so bind failures surface at startup.
pub async fn serve(router: Router, listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, router).await?;

    Ok(())
}

/// Adds the Prometheus scrape endpoint to `router`.
pub fn setup_metrics_routes(router: Router, handle: PrometheusHandle) -> Router {
    router.route(
        "/metrics",
        get(move || std::future::ready(handle.render())),
    )
}

/// Installs the global recorder. Can only succeed once per process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // Latencies in seconds.
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];
    // A batch delete carries 1 to 10 entries.
    const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .set_buckets_for_metric(
            Matcher::Suffix("_batch_size".to_owned()),
            BATCH_SIZE_BUCKETS,
        )?
        .install_recorder()
}

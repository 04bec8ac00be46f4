//! Consume an SQS queue and forward its messages to a sink as CloudEvents.
use std::num::NonZeroUsize;
use std::sync::Arc;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use health::{HealthRegistry, ReadinessFlag};
use sqs_common::metrics::{serve, setup_metrics_recorder, setup_metrics_routes};
use sqs_common::sink::{EventSink, HttpSink, PrintSink};
use sqs_common::sqs::SqsQueueClient;
use sqs_source::config::Config;
use sqs_source::error::PipelineError;
use sqs_source::pipeline::Pipeline;
use sqs_source::stats::StatsReporter;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

async fn wait_for_shutdown_signal() {
    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm => info!("received SIGTERM"),
    }
}

async fn index() -> &'static str {
    "sqs source"
}

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    setup_tracing();

    let config =
        Config::init_from_env().map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

    let parallelism = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    let pipeline_config = config.pipeline_config(parallelism)?;
    let transform = config.transform();

    let sink: Arc<dyn EventSink> = match (&config.sink_url, config.print_sink) {
        (_, true) => Arc::new(PrintSink {}),
        (Some(url), false) => Arc::new(HttpSink::new(url.clone(), config.sink_timeout.0)?),
        (None, false) => return Err(PipelineError::MissingSink),
    };

    let recorder = setup_metrics_recorder().map_err(|e| PipelineError::Metrics(e.to_string()))?;
    let liveness = HealthRegistry::new("liveness");
    let readiness = ReadinessFlag::new();

    let app = {
        let liveness = liveness.clone();
        let readiness = readiness.clone();
        Router::new()
            .route("/", get(index))
            .route(
                "/_readiness",
                get(move || std::future::ready(readiness.check())),
            )
            .route(
                "/_liveness",
                get(move || std::future::ready(liveness.get_status())),
            )
    };
    let app = setup_metrics_routes(app, recorder);

    let listener = TcpListener::bind(config.bind()).await?;
    tokio::spawn(async move {
        if let Err(error) = serve(app, listener).await {
            error!(%error, "http server failed");
        }
    });

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    let queue = SqsQueueClient::new(&config.arn.region).await;
    info!(arn = %config.arn, "starting sqs source");

    Pipeline::new(
        pipeline_config,
        Arc::new(queue),
        sink,
        transform,
        StatsReporter::new(&config.arn.resource),
    )
    .with_readiness(readiness)
    .with_liveness(liveness, config.liveness_deadline.0)
    .run(shutdown)
    .await
}

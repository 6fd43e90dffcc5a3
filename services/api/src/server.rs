use crate::cli::ServeArgs;
use crate::infra::{build_engine, AppState};
use crate::routes::with_matching_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use screenmatch::config::AppConfig;
use screenmatch::error::AppError;
use screenmatch::matching::{EngineError, InMemoryLedger, MatchTrigger, MatchingEngine};
use screenmatch::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let cycle_interval = config
        .matching
        .cycle_interval
        .to_std()
        .unwrap_or(Duration::from_secs(15 * 60));
    let (engine, _ledger) = build_engine(config.matching.clone());
    spawn_cycle_scheduler(engine.clone(), cycle_interval);

    let app = with_matching_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "waitlist matching service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Fire a scheduled matching cycle at a fixed cadence. A rejected lease is
/// routine when another instance holds it; everything else is logged and the
/// schedule carries on.
fn spawn_cycle_scheduler(engine: Arc<MatchingEngine<InMemoryLedger>>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; skip it so the service
        // finishes binding before the first cycle.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match engine.run_cycle(MatchTrigger::Scheduled) {
                Ok(record) => {
                    info!(
                        matched = record.matched_count,
                        expired = record.expired_count,
                        "scheduled matching cycle completed"
                    );
                }
                Err(EngineError::AlreadyRunning) => {
                    debug!("scheduled cycle skipped: lease held elsewhere");
                }
                Err(err) => {
                    warn!(%err, "scheduled matching cycle failed");
                }
            }
        }
    });
}

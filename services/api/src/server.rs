use crate::cli::ServeArgs;
use crate::infra::{external_channels, load_ledger, AppState, LoggingSender};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use licensing_engine::config::AppConfig;
use licensing_engine::error::AppError;
use licensing_engine::telemetry;
use licensing_engine::workflows::licensing::{Ledger, LicensingService};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

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

    let ledger = load_ledger(args.snapshot.as_deref()).await?;
    let mut builder = LicensingService::builder(Ledger::from_store(Arc::new(ledger)))
        .config(config.licensing.clone());
    for channel in external_channels() {
        builder = builder.sender(channel, Arc::new(LoggingSender::new(channel)));
    }
    let service = Arc::new(builder.build());

    let app = with_service_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        delivery = ?config.licensing.alert_delivery,
        "licensing engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

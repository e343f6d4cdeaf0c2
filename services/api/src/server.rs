use crate::cli::ServeArgs;
use crate::infra::{
    deliver_outbox, load_permissions, AppState, OutboxDispatcher, OUTBOX_CAPACITY,
};
use crate::routes::with_transaction_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use salepath::config::AppConfig;
use salepath::error::AppError;
use salepath::telemetry;
use salepath::workflows::sale::{
    InMemorySaleStore, JsonlAuditStore, PermissionMatrix, PhaseGraph, SaleStore,
    SequentialStore, TransactionEngine,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let permissions = load_permissions(
        config.lifecycle.permission_rules_path.as_deref(),
        &PhaseGraph::standard(),
    )?;

    match config.lifecycle.audit_log_path.clone() {
        Some(path) => {
            let audit = Arc::new(JsonlAuditStore::open(&path)?);
            info!(path = %path.display(), "appending transition records to audit log");
            warn!(
                path = %path.display(),
                "transactions are held in memory; audit entries from earlier runs have no matching transaction"
            );
            let store = SequentialStore::new(Arc::new(InMemorySaleStore::default()), audit);
            serve_with(config, Arc::new(store), permissions).await
        }
        None => serve_with(config, Arc::new(InMemorySaleStore::default()), permissions).await,
    }
}

async fn serve_with<S>(
    config: AppConfig,
    store: Arc<S>,
    permissions: PermissionMatrix,
) -> Result<(), AppError>
where
    S: SaleStore + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let rules_version = permissions.version().to_string();
    let (dispatcher, outbox) = OutboxDispatcher::channel(OUTBOX_CAPACITY);
    tokio::spawn(deliver_outbox(outbox));
    let engine = Arc::new(TransactionEngine::with_permissions(
        store,
        Arc::new(dispatcher),
        permissions,
    ));

    let app = with_transaction_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, %rules_version, "sale lifecycle service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

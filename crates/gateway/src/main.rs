//! Placement API Gateway
//!
//! HTTP surface over the relation layer:
//! - Attachments of any entity (links, files, invitations, ...)
//! - Audit snapshots
//! - Health and readiness checks
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    http::StatusCode,
    routing::{delete, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use placement_common::{
    config::AppConfig,
    crypto::{install_field_cipher, FieldCipher},
    db::{DbPool, Repository},
    metrics,
    rel::{AttachmentService, EntityService},
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when running on in-process stores
    pub db: Option<DbPool>,
    pub attachments: AttachmentService,
    pub entities: EntityService,
}

impl AppState {
    /// State backed by the Postgres repository
    pub fn with_repository(config: Arc<AppConfig>, db: DbPool) -> Self {
        let repo = Arc::new(Repository::new(db.clone()));
        Self {
            config,
            db: Some(db),
            attachments: AttachmentService::new(repo.clone(), repo.clone())
                .with_snapshots(repo.clone()),
            entities: EntityService::new(repo.clone(), repo.clone(), repo),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!("Starting Placement API Gateway v{}", placement_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
    }
    metrics::register_metrics();

    // Sealed fields cannot be read or written without the key
    let cipher = FieldCipher::from_config(&config.encryption).map_err(|e| {
        error!(error = %e, "Field encryption is not configured");
        e
    })?;
    install_field_cipher(cipher)?;

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.migrate().await?;
    }

    let state = AppState::with_repository(config.clone(), db);

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // In-flight requests get `shutdown_timeout` to drain after the signal
    let (draining_tx, mut draining_rx) = watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = draining_tx.send(true);
        })
        .into_future();

    let drain_deadline = async {
        if draining_rx.wait_for(|draining| *draining).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(config.shutdown_timeout()).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(
                timeout_secs = config.shutdown_timeout().as_secs(),
                "Shutdown timeout reached, dropping open connections"
            );
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout =
        TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, state.config.request_timeout());

    // API routes
    let api_routes = Router::new()
        // Attachment endpoints
        .route(
            "/entities/{kind}/{id}/attachments",
            get(handlers::attachments::list_attachments)
                .post(handlers::attachments::create_attachment),
        )
        .route(
            "/entities/{kind}/{id}/links/{link_type}",
            get(handlers::attachments::get_link),
        )
        .route(
            "/entities/{kind}/{id}/files/{code}",
            get(handlers::attachments::get_file),
        )
        .route(
            "/entities/{kind}/{id}/texts/{code}",
            get(handlers::attachments::get_text),
        )
        .route(
            "/attachments/{id}",
            delete(handlers::attachments::delete_attachment),
        )

        // Audit endpoints
        .route(
            "/entities/{kind}/{id}/snapshots",
            get(handlers::snapshots::list_snapshots),
        );

    // Compose the app
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .route_layer(axum::middleware::from_fn(middleware::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

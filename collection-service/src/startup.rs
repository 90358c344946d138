//! Application startup and lifecycle management.

use crate::config::CollectionConfig;
use crate::handlers::{payments, references, reports};
use crate::services::{get_metrics, init_metrics, CollectionService, Database, LedgerStore};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState<S: LedgerStore> {
    pub collection: CollectionService<S>,
}

impl<S: LedgerStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
        }
    }
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(collection: CollectionService<S>) -> Self {
        Self { collection }
    }
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "collection-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "collection-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Readiness check passed");
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

fn api_router<S: LedgerStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/collect", post(payments::collect_payment::<S>))
        .route("/payments/:id", get(payments::get_payment::<S>))
        .route("/payments/:id/revert", post(payments::revert_payment::<S>))
        .route(
            "/vehicles/:vehicle/payments",
            get(payments::vehicle_payments::<S>),
        )
        .route(
            "/collectors/:id/payments",
            get(payments::collector_payments::<S>),
        )
        .route("/references", post(references::register_reference::<S>))
        .route(
            "/references/:reference",
            get(references::lookup_reference::<S>),
        )
        .route("/tokens/:id/cancel", post(references::cancel_token::<S>))
        .route("/quote", get(reports::quote::<S>))
        .route("/totals", get(reports::totals::<S>))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

fn with_layers(router: Router, request_timeout: Duration) -> Router {
    router
        // Outer bound only; the unit-of-work timeout normally answers first.
        .layer(TimeoutLayer::new(request_timeout + Duration::from_secs(1)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
}

/// Build the HTTP API for any ledger store.
pub fn build_router<S: LedgerStore>(state: AppState<S>) -> Router {
    let request_timeout = state.collection.request_timeout();
    with_layers(api_router(state), request_timeout)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    db: Arc<Database>,
    state: AppState<Database>,
}

impl Application {
    /// Connect, migrate and bind the listener.
    pub async fn build(config: CollectionConfig) -> Result<Self, AppError> {
        // Initialize metrics
        init_metrics();

        // Connect to database
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
            config.database.lock_timeout_ms,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let db = Arc::new(db);
        let collection = CollectionService::new(
            db.clone(),
            config.duplicate_guard,
            config.request_timeout,
        );

        // Bind HTTP listener
        let http_addr = config.common.socket_addr()?;
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Collection service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            db,
            state: AppState::new(collection),
        })
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .with_state(HealthState {
                db: self.db.clone(),
            });

        let request_timeout = self.state.collection.request_timeout();
        let router = with_layers(api_router(self.state).merge(health_router), request_timeout);

        tracing::info!(
            service = "collection-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
